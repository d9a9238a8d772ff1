// src/services/mod.rs

pub mod allocation;
pub mod analytics;
pub mod cache;
pub mod scoring;
pub mod session;
