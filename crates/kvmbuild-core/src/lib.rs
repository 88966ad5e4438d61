//! kvmbuild-core - release pipeline for the USB KVM client
//!
//! Turns the client's source tree and installed dependency set into a single
//! Windows executable:
//! - Resolves the project root into an immutable context
//! - Freezes installed packages into `data/requirements.txt`
//! - Regenerates UI resources
//! - Runs the formatter and linter under an explicit quality policy
//! - Packages a single-file executable and publishes it to `releases/`

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod fakes;
pub mod gate;
pub mod lock;
pub mod manifest;
pub mod obs;
pub mod packager;
pub mod pipeline;
pub mod publish;
pub mod report;
pub mod resources;
pub mod runner;
pub mod stage;
pub mod telemetry;

// Re-export key types
pub use cancel::CancelToken;
pub use config::{BuildConfig, PathsConfig, QualityConfig, ToolsConfig};
pub use context::PipelineContext;
pub use error::{PipelineError, Result};
pub use gate::{QualityGate, QualityPolicy};
pub use manifest::{read_manifest, write_manifest, PackagePin, PackageSource, PipFreeze};
pub use packager::{DataDir, PackagerConfig};
pub use pipeline::{Pipeline, PipelineResult};
pub use publish::{publish, PublishedArtifact};
pub use report::{RunReport, StageOutcome, StageStatus};
pub use runner::{ProcessExecutor, ToolExecutor, ToolOutput, ToolRuntime};
pub use stage::{StageKind, StageTimeouts, ToolInvocation};
pub use telemetry::init_tracing;
