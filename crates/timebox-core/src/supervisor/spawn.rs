//! Process spawning.
//!
//! Starts the child described by an [`Invocation`] as the leader of its own
//! process group.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::handle::ChildHandle;
use crate::error::SuperviseError;
use crate::invocation::{Invocation, StdioMode};

/// Spawns the child for `invocation`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns `SuperviseError::Launch` if the process cannot be spawned or its
/// PID cannot be obtained.
pub(crate) fn spawn(invocation: &Invocation) -> Result<ChildHandle, SuperviseError> {
    let mut cmd = Command::new(invocation.program());

    cmd.args(invocation.args())
        .stdin(Stdio::null())
        .process_group(0)
        .kill_on_drop(false);

    if invocation.stdio() == StdioMode::Null {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    }

    if let Some(cwd) = invocation.cwd() {
        cmd.current_dir(cwd);
    }

    for (k, v) in invocation.env() {
        cmd.env(k, v);
    }

    let launch_error = |source| SuperviseError::Launch {
        program: invocation.program().display().to_string(),
        source,
    };

    let child = cmd.spawn().map_err(launch_error)?;

    let pid = child.id().ok_or_else(|| {
        launch_error(std::io::Error::other(
            "child exited before its PID could be read",
        ))
    })?;

    debug!(pid, command = %invocation.display_command(), "spawned child");

    Ok(ChildHandle::new(child, pid))
}
