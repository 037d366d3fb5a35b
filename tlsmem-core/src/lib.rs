//! tlsmem Core Library
//!
//! Measurement orchestration for comparing the heap footprint of
//! interchangeable TLS libraries. Provides configuration, the workload
//! manifest overlay, candidate builds, profiled runs, trace extraction,
//! and chart rendering.

pub mod build;
pub mod config;
pub mod error;
pub mod layout;
pub mod lock;
pub mod orchestrator;
pub mod overlay;
pub mod profiler;
pub mod render;
pub mod session;
pub mod tools;
pub mod trace;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigLoader, HarnessConfig, ModeConfig, PlannedCandidate};
pub use error::{HarnessError, HarnessResult, RunFailure};
pub use orchestrator::{Run, RunStatus};
pub use overlay::ManifestOverlay;
pub use session::{Collaborators, Session, SessionOptions, SessionReport};
pub use trace::{extract, ExtractOptions, Samples, TraceHandle};
pub use types::{CandidateName, ModeName, SessionId, TimeUnit};
