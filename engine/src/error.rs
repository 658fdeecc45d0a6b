// Licensed under the Apache-2.0 license

use core::fmt;

use vbfw_types::Target;
use vbfw_verify::CompatError;

pub type UpdateResult<T> = Result<T, UpdateError>;

/// Everything that can stop, or intentionally suspend, an update run.
#[derive(Debug)]
pub enum UpdateError {
    /// Rootkey mismatch between the device and the bundle. Never
    /// auto-recovered; flashing RW signed by a foreign key bricks the
    /// device at the next verified boot.
    FatalIncompatible { reason: String },

    /// The bundle is older, in key-version terms, than firmware the device
    /// has already trusted. Recoverable by declining the update.
    RollbackRejected { reason: String },

    /// A read-only section must change but write protection is engaged.
    /// Recoverable only by operator action.
    WriteProtected { target: Target },

    /// An external tool failed or produced unparsable output. Always fatal;
    /// a partially trusted flash write is worse than none.
    Tool { tool: &'static str, reason: String },

    /// The persisted property store failed a read or write.
    Property { key: &'static str, reason: String },

    /// Not a failure: a trial was armed and the protocol continues after
    /// the next boot.
    NeedsReboot,

    /// Another updater instance holds the lock.
    AlreadyRunning { pid: u32 },

    /// The running firmware does not match the bundle in a mode that only
    /// checks versions.
    VersionMismatch { reason: String },

    /// Malformed invocation, mode string, or bundle.
    BadInput { reason: String },
}

impl UpdateError {
    pub fn bad_input(reason: impl Into<String>) -> Self {
        UpdateError::BadInput {
            reason: reason.into(),
        }
    }

    /// Exit code reported to calling automation. The reboot and
    /// write-protect cases get stable codes of their own so scripts can
    /// branch without parsing text.
    pub fn exit_code(&self) -> i32 {
        match self {
            UpdateError::NeedsReboot => 3,
            UpdateError::WriteProtected { .. } => 4,
            UpdateError::AlreadyRunning { .. } => 5,
            _ => 1,
        }
    }
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UpdateError::FatalIncompatible { reason } => {
                write!(f, "incompatible firmware: {reason}")
            }
            UpdateError::RollbackRejected { reason } => write!(f, "{reason}"),
            UpdateError::WriteProtected { target } => write!(
                f,
                "{target} firmware needs a read-only update but write protection is enabled"
            ),
            UpdateError::Tool { tool, reason } => write!(f, "{tool} failed: {reason}"),
            UpdateError::Property { key, reason } => {
                write!(f, "property {key}: {reason}")
            }
            UpdateError::NeedsReboot => {
                write!(f, "update staged; reboot to continue the trial")
            }
            UpdateError::AlreadyRunning { pid } => {
                write!(f, "another updater instance is running (pid {pid})")
            }
            UpdateError::VersionMismatch { reason } => {
                write!(f, "firmware version mismatch: {reason}")
            }
            UpdateError::BadInput { reason } => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for UpdateError {}

impl From<CompatError> for UpdateError {
    fn from(err: CompatError) -> Self {
        match err {
            CompatError::KeyExtraction(reason) => UpdateError::Tool {
                tool: "key extraction",
                reason,
            },
            CompatError::SignatureCheck(reason) => UpdateError::Tool {
                tool: "signature verification",
                reason,
            },
            CompatError::RollbackRead(reason) => UpdateError::Property {
                key: "tpm_fwver",
                reason,
            },
        }
    }
}
