//! Logging setup for the `build-pipeline` binary.
//!
//! Pipeline events come from `kvmbuild_core` and the binary itself. Without
//! `RUST_LOG`, only those targets log at the requested level; everything else
//! (tokio, dependencies) is held at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log targets that belong to the pipeline.
pub const PIPELINE_TARGETS: &[&str] = &["kvmbuild_core", "build_pipeline"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(PIPELINE_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Install the global subscriber, writing to stderr so stdout carries only
/// command output (summaries, `--json` reports).
///
/// `RUST_LOG` wins over `level`. Later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
}
