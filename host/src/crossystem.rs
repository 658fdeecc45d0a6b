// Licensed under the Apache-2.0 license

//! Property store backed by the system-property tool.

use std::process::{Command, Stdio};

use vbfw_engine::{PropKey, PropertyStore, UpdateError, UpdateResult};

const CROSSYSTEM: &str = "crossystem";

pub struct Crossystem;

impl Crossystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Crossystem {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyStore for Crossystem {
    /// Absent or unreadable properties report `None`: a freshly wiped or
    /// non-stock device simply has not populated the store yet.
    fn get(&self, key: PropKey) -> UpdateResult<Option<String>> {
        let output = Command::new(CROSSYSTEM)
            .arg(key.name())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| UpdateError::Property {
                key: key.name(),
                reason: format!("cannot run {CROSSYSTEM}: {e}"),
            })?;
        if !output.status.success() {
            return Ok(None);
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if value.is_empty() || value == "(error)" {
            return Ok(None);
        }
        Ok(Some(value))
    }

    fn set(&self, key: PropKey, value: &str) -> UpdateResult<()> {
        let assignment = format!("{}={}", key.name(), value);
        crate::run_tool(CROSSYSTEM, Command::new(CROSSYSTEM).arg(&assignment)).map_err(|e| {
            UpdateError::Property {
                key: key.name(),
                reason: e.to_string(),
            }
        })
    }
}
