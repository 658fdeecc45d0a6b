// Licensed under the Apache-2.0 license

//! Compatibility checks that gate a firmware update.
//!
//! The checker reasons about results produced by external tools; it performs
//! no cryptography itself. Everything it consults is behind [`CompatEnv`] so
//! the decision logic can be exercised against an in-memory fake.

use core::fmt;

use vbfw_types::{PreambleFlags, RootKey, RwFirmwareInfo};

/// Outcome of the compatibility gate. Produced fresh on every run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompatVerdict {
    /// The bundled RW firmware may be applied as-is.
    Compatible,
    /// The RW image is intact but only acceptable together with a new RO
    /// section; a plain RW update would be rejected at boot.
    NeedsRoUpdate { reason: String },
    /// Rootkey mismatch. RW firmware signed against a different root key
    /// than the device RO validates with can never boot.
    Fatal { reason: String },
}

impl CompatVerdict {
    pub fn is_compatible(&self) -> bool {
        matches!(self, CompatVerdict::Compatible)
    }
}

/// Failure while gathering the facts the gate reasons about.
#[derive(Debug)]
pub enum CompatError {
    /// Root key extraction from the device or the bundle failed.
    KeyExtraction(String),
    /// The signature-verification tool failed or produced garbage.
    SignatureCheck(String),
    /// The persisted rollback counter could not be read.
    RollbackRead(String),
}

impl fmt::Display for CompatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompatError::KeyExtraction(e) => write!(f, "root key extraction failed: {e}"),
            CompatError::SignatureCheck(e) => write!(f, "signature verification failed: {e}"),
            CompatError::RollbackRead(e) => write!(f, "rollback counter read failed: {e}"),
        }
    }
}

impl std::error::Error for CompatError {}

/// Environment the compatibility gate runs against.
pub trait CompatEnv {
    /// Root public key the device RO currently validates with, when one can
    /// be extracted. `None` on factory-virgin or non-stock firmware.
    fn current_root_key(&self) -> Result<Option<RootKey>, CompatError>;

    /// Root public key embedded in the bundled image, when the bundle
    /// carries an RO section.
    fn target_root_key(&self) -> Result<Option<RootKey>, CompatError>;

    /// Declared versions and preamble flags recovered from the bundled RW
    /// keyblock by the signature-verification tool.
    fn target_rw_info(&self) -> Result<RwFirmwareInfo, CompatError>;

    /// Firmware rollback version last persisted outside writable flash.
    /// `None` when the store has never been initialized.
    fn stored_rollback_version(&self) -> Result<Option<u32>, CompatError>;
}

impl<'a, T: CompatEnv + ?Sized> CompatEnv for &'a T {
    fn current_root_key(&self) -> Result<Option<RootKey>, CompatError> {
        (**self).current_root_key()
    }

    fn target_root_key(&self) -> Result<Option<RootKey>, CompatError> {
        (**self).target_root_key()
    }

    fn target_rw_info(&self) -> Result<RwFirmwareInfo, CompatError> {
        (**self).target_rw_info()
    }

    fn stored_rollback_version(&self) -> Result<Option<u32>, CompatError> {
        (**self).stored_rollback_version()
    }
}

/// Compatibility gate.
pub struct CompatChecker<Env: CompatEnv> {
    env: Env,
}

impl<Env: CompatEnv> CompatChecker<Env> {
    pub fn new(env: Env) -> Self {
        Self { env }
    }

    /// Run the gate checks in order, short-circuiting on the first failing
    /// class.
    pub fn check(&self) -> Result<CompatVerdict, CompatError> {
        if let Some(verdict) = self.check_root_key()? {
            return Ok(verdict);
        }

        let info = self.env.target_rw_info()?;

        if let Some(verdict) = self.check_rollback(&info)? {
            return Ok(verdict);
        }

        if info.flags.contains(PreambleFlags::USE_RO_NORMAL) {
            log::warn!(
                "target firmware is keyblock-only (RO-normal); the reported \
                 firmware id will not change even though new bytes are written"
            );
        }

        Ok(CompatVerdict::Compatible)
    }

    fn check_root_key(&self) -> Result<Option<CompatVerdict>, CompatError> {
        let current = match self.env.current_root_key()? {
            Some(key) => key,
            None => {
                // Factory-virgin or non-stock firmware: unknown, not a
                // mismatch.
                log::info!("device root key not extractable; skipping rootkey comparison");
                return Ok(None);
            }
        };
        let target = match self.env.target_root_key()? {
            Some(key) => key,
            None => {
                log::debug!("bundle carries no root key; RO section unchanged");
                return Ok(None);
            }
        };

        if current != target {
            return Ok(Some(CompatVerdict::Fatal {
                reason: format!("rootkey mismatch: device has {current}, bundle has {target}"),
            }));
        }
        Ok(None)
    }

    fn check_rollback(&self, info: &RwFirmwareInfo) -> Result<Option<CompatVerdict>, CompatError> {
        let stored = match self.env.stored_rollback_version()? {
            Some(stored) => stored,
            None => {
                log::info!("rollback counter uninitialized; skipping version check");
                return Ok(None);
            }
        };

        let offered = info.rollback_version();
        if offered < stored {
            return Ok(Some(CompatVerdict::NeedsRoUpdate {
                reason: format!(
                    "rollback rejected: bundle declares 0x{offered:08x} but the device \
                     already trusts 0x{stored:08x}"
                ),
            }));
        }
        log::debug!("rollback check passed: bundle 0x{offered:08x} >= stored 0x{stored:08x}");
        Ok(None)
    }
}
