//! UI resource regeneration.

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::runner::ToolRuntime;
use crate::stage::ToolInvocation;

/// Run the external UI resource generator in the project root.
///
/// Success or failure is decided by exit status alone; the generator's
/// diagnostics are propagated unmodified.
pub async fn regenerate_resources(rt: &ToolRuntime<'_>, invocation: &ToolInvocation) -> Result<()> {
    let output = rt.run(invocation).await?;
    if !output.passed() {
        return Err(PipelineError::ExternalTool {
            tool: invocation.display(),
            exit_code: output.exit_code,
            stderr: output.diagnostics().to_string(),
        });
    }
    debug!(duration_ms = output.duration_ms, "UI resources regenerated");
    Ok(())
}
