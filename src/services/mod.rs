// src/services/mod.rs

//! Orchestration of quiz generation and grading, plus the event stream and
//! background reconciliation they rely on.

pub mod generation;
pub mod grading;
pub mod reconcile;
pub mod stream;

pub use generation::GenerationService;
pub use grading::GradingService;
