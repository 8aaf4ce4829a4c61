//! Dispatch engine: one fetch → filter → paced sequential send cycle.

pub mod engine;
pub mod pacing;

pub use engine::DispatchEngine;
