//! Prioritization Orchestration Engine.
//!
//! Stateful multi-stage pipeline that turns a user's outcome, their
//! available tasks, and any reflections they've logged into an ordered,
//! dependency-aware execution plan. The engine itself only depends on the
//! trait seams in [`llm`], [`store`], and [`clock`] — concrete LLM clients,
//! embedding stores, and persistent stores live in sibling crates.

pub mod bridging;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod gap_detection;
pub mod hybrid_loop;
pub mod llm;
pub mod manual_task_service;
pub mod model;
pub mod progress_stream;
pub mod quality;
pub mod reflection_engine;
pub mod retry_queue;
pub mod scoring;
pub mod session_controller;
pub mod store;

pub use engine::PrioritizationEngine;
pub use error::{Error, Result};
