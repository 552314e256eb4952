// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod error;
pub mod retry;
pub mod window;

pub mod checkpoint;
pub mod sources;

// Collaborators: feeds, AI, delivery
pub mod ai;
pub mod fetch;
pub mod notify;
pub mod prompts;

// Orchestration
pub mod cycle;
pub mod group;
pub mod job;
pub mod lock;
pub mod scheduler;

// Service surface
pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod metrics;

pub use crate::cycle::{CycleOrchestrator, CycleOutput};
pub use crate::error::{DigestError, Result};
pub use crate::job::{RunJob, Trigger, TriggerOutcome};
