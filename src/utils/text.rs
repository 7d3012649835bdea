// src/utils/text.rs

/// Sanitizes admin-supplied display text (titles, descriptions) with ammonia.
///
/// Safe inline markup such as `<b>` survives; scripts, iframes and event
/// handler attributes are removed. Surrounding whitespace is trimmed.
pub fn clean_text(input: &str) -> String {
    ammonia::clean(input.trim())
}
