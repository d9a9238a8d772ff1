// src/models/mod.rs

pub mod analytics;
pub mod exam;
pub mod exam_record;
pub mod purchase;
pub mod question;
pub mod session;
