// src/models/mod.rs

pub mod attempt;
pub mod section;
pub mod test;
pub mod user;
