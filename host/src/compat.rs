// Licensed under the Apache-2.0 license

//! The compatibility gate's view of the real device and bundle.

use std::cell::RefCell;

use vbfw_engine::{Bundle, FlashAccess, PropKey, PropertyStoreExt};
use vbfw_types::{extract_root_key, GbbError, Region, RootKey, RwFirmwareInfo, Target};
use vbfw_verify::{CompatEnv, CompatError};

use crate::crossystem::Crossystem;
use crate::flashrom::Flashrom;
use crate::futility::VbutilFirmware;

pub struct HostCompatEnv<'a> {
    flash: &'a Flashrom,
    store: &'a Crossystem,
    bundle: &'a Bundle,
    vbutil: VbutilFirmware,
    // The chip's RO section is read at most once per run.
    current_ro: RefCell<Option<Vec<u8>>>,
}

impl<'a> HostCompatEnv<'a> {
    pub fn new(flash: &'a Flashrom, store: &'a Crossystem, bundle: &'a Bundle) -> Self {
        Self {
            flash,
            store,
            bundle,
            vbutil: VbutilFirmware::new(),
            current_ro: RefCell::new(None),
        }
    }

    fn current_ro(&self) -> Result<Vec<u8>, CompatError> {
        if let Some(ro) = self.current_ro.borrow().as_ref() {
            return Ok(ro.clone());
        }
        let ro = self
            .flash
            .read(Target::Main, Region::Ro)
            .map_err(|e| CompatError::KeyExtraction(e.to_string()))?;
        *self.current_ro.borrow_mut() = Some(ro.clone());
        Ok(ro)
    }

    fn main_image(&self) -> Option<&vbfw_engine::TargetImage> {
        self.bundle.image(Target::Main)
    }
}

impl CompatEnv for HostCompatEnv<'_> {
    fn current_root_key(&self) -> Result<Option<RootKey>, CompatError> {
        let ro = self.current_ro()?;
        match extract_root_key(&ro) {
            Ok(key) => Ok(Some(key)),
            // Factory-virgin or non-stock firmware carries no usable key.
            Err(GbbError::NotFound) => Ok(None),
            Err(err) => {
                log::warn!("device GBB unreadable ({err}); treating root key as unknown");
                Ok(None)
            }
        }
    }

    fn target_root_key(&self) -> Result<Option<RootKey>, CompatError> {
        let Some(img) = self.main_image() else {
            return Ok(None);
        };
        let Some(ro) = img.region(Region::Ro) else {
            // RW-only bundle: the trust anchor is not being replaced.
            return Ok(None);
        };
        extract_root_key(ro)
            .map(Some)
            .map_err(|e| CompatError::KeyExtraction(format!("bundle RO image: {e}")))
    }

    fn target_rw_info(&self) -> Result<RwFirmwareInfo, CompatError> {
        let img = self
            .main_image()
            .ok_or_else(|| CompatError::SignatureCheck("bundle has no main image".into()))?;
        let payload = img
            .region(Region::A)
            .ok_or_else(|| CompatError::SignatureCheck("bundle has no RW payload".into()))?;

        let root_key = match self.current_root_key()? {
            Some(key) => key,
            None => self.target_root_key()?.ok_or_else(|| {
                CompatError::SignatureCheck(
                    "no root public key available to verify the RW image against".into(),
                )
            })?,
        };

        self.vbutil
            .rw_info(payload, &root_key)
            .map_err(|e| CompatError::SignatureCheck(e.to_string()))
    }

    fn stored_rollback_version(&self) -> Result<Option<u32>, CompatError> {
        self.store
            .get_u32(PropKey::TpmFirmwareVersion)
            .map_err(|e| CompatError::RollbackRead(e.to_string()))
    }
}
