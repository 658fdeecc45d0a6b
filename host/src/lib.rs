// Licensed under the Apache-2.0 license

//! Process-backed adapters binding the update engine to the real device:
//! the flashing tool, the signature-verification tool, the property store,
//! and the single-instance lock.

use std::process::{Command, Stdio};

use vbfw_engine::{UpdateError, UpdateResult};

mod bundle;
mod compat;
mod crossystem;
mod flashrom;
mod futility;
mod lock;
mod wp;

pub use bundle::{load_bundle, LoadedBundle};
pub use compat::HostCompatEnv;
pub use crossystem::Crossystem;
pub use flashrom::Flashrom;
pub use futility::VbutilFirmware;
pub use lock::InstanceLock;
pub use wp::HostWpQuery;

/// Run a tool to completion, failing on a nonzero exit.
pub(crate) fn run_tool(tool: &'static str, cmd: &mut Command) -> UpdateResult<()> {
    log::debug!("running {:?} {:?}", cmd.get_program(), cmd.get_args());
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| UpdateError::Tool {
            tool,
            reason: e.to_string(),
        })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(UpdateError::Tool {
            tool,
            reason: format!(
                "exited with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }
}

/// Run a tool and hand back its stdout.
pub(crate) fn run_tool_stdout(tool: &'static str, cmd: &mut Command) -> UpdateResult<String> {
    log::debug!("running {:?} {:?}", cmd.get_program(), cmd.get_args());
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| UpdateError::Tool {
            tool,
            reason: e.to_string(),
        })?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(UpdateError::Tool {
            tool,
            reason: format!(
                "exited with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }
}
