// src/routes.rs

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{
        admin, attempts, auth, catalog,
        session::{self, CLIENT_ID_HEADER},
    },
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Public: auth, catalog, sections.
/// * Authenticated: sessions and attempts.
/// * Admin: content management (auth first, then the role check).
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(CLIENT_ID_HEADER),
        ]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    let test_routes = Router::new()
        .route("/", get(catalog::list_tests))
        .route("/{id}", get(catalog::get_test));

    let session_routes = Router::new()
        .route("/{test_id}", get(session::get_session))
        .route("/{test_id}/begin", post(session::begin))
        .route("/{test_id}/resume", post(session::resume))
        .route("/{test_id}/discard", post(session::discard))
        .route(
            "/{test_id}/answers/{question_id}",
            put(session::select_answer).delete(session::clear_answer),
        )
        .route("/{test_id}/review/{question_id}", post(session::toggle_review))
        .route("/{test_id}/goto", post(session::go_to))
        .route("/{test_id}/next", post(session::next))
        .route("/{test_id}/previous", post(session::previous))
        .route("/{test_id}/submit", post(session::submit))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let attempt_routes = Router::new()
        .route("/", get(attempts::list_attempts))
        .route("/{id}", delete(attempts::delete_attempt))
        .route("/{id}/result", get(attempts::get_result))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/tests", post(admin::create_test))
        .route("/tests/import", post(admin::import_tests))
        .route("/tests/seed", post(admin::seed_examples))
        .route("/tests/{id}", delete(admin::delete_test))
        .route("/sections", post(admin::create_section))
        // Layers run outside-in: auth first, then the admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/tests", test_routes)
        .route("/api/sections", get(catalog::list_sections))
        .nest("/api/sessions", session_routes)
        .nest("/api/attempts", attempt_routes)
        .nest("/api/admin", admin_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
