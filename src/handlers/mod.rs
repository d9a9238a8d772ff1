// src/handlers/mod.rs

pub mod cache;
pub mod exam;
pub mod session;
