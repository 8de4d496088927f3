//! Stepmirror Reporter
//!
//! Mirrors a host test runner's suites, tests, steps and meta-steps onto a
//! remote reporting service as a tree of launch items.

pub mod artifacts;
pub mod events;
pub mod orchestrator;
pub mod queue;
pub mod reconciler;
pub mod remote;
pub mod rollup;
pub mod state;

pub use artifacts::{CommandScreenCapture, FailureArtifactCollector, ScreenCapture};
pub use events::{HostEvent, MetaStep, Step, Suite, Test, TestFailure};
pub use orchestrator::{CurrentItemLogger, Reporter, ReporterHandle};
pub use reconciler::MetaStepKey;
pub use state::CorrelationTable;
