pub mod config;
pub mod context;
pub mod error;
pub mod progress;
pub mod runner;
pub mod stages;

pub use config::PipelineConfig;
pub use context::{PipelineContext, StageOutputs};
pub use error::{PipelineError, PipelineWarning, StageError};
pub use progress::{BroadcastProgress, NoopProgress, ProgressReporter, StageEvent, StageEventKind};
pub use runner::{Pipeline, RunOutcome};
pub use stages::{FailureMode, StageSpec, STAGES};
