// src/models/mod.rs

pub mod answer;
pub mod event;
pub mod question;
pub mod quiz_attempt;
pub mod quiz_view;
pub mod session;
