// src/exam/mod.rs

//! Taking a test: answer sets, the session state machine, its async
//! controller and the scoring engine.

pub mod answers;
pub mod controller;
pub mod registry;
pub mod scoring;
pub mod session;
