// Licensed under the Apache-2.0 license

//! In-memory fakes for exercising the engine without a device attached.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use vbfw_types::{Region, RootKey, RwFirmwareInfo, Target};
use vbfw_verify::{CompatEnv, CompatError};

use crate::error::{UpdateError, UpdateResult};
use crate::flash::FlashAccess;
use crate::props::{PropKey, PropertyStore};
use crate::wp::WpQuery;

/// Property store backed by a map.
#[derive(Default)]
pub struct MemStore {
    values: RefCell<BTreeMap<PropKey, String>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: PropKey, value: impl Into<String>) -> Self {
        self.values.borrow_mut().insert(key, value.into());
        self
    }

    pub fn value(&self, key: PropKey) -> Option<String> {
        self.values.borrow().get(&key).cloned()
    }
}

impl PropertyStore for MemStore {
    fn get(&self, key: PropKey) -> UpdateResult<Option<String>> {
        Ok(self.values.borrow().get(&key).cloned())
    }

    fn set(&self, key: PropKey, value: &str) -> UpdateResult<()> {
        self.values.borrow_mut().insert(key, value.to_owned());
        Ok(())
    }
}

/// Flash chip backed by a map, recording every write.
#[derive(Default)]
pub struct MemFlash {
    regions: RefCell<BTreeMap<(Target, Region), Vec<u8>>>,
    writes: RefCell<Vec<(Target, Region)>>,
}

impl MemFlash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(self, target: Target, region: Region, data: Vec<u8>) -> Self {
        self.regions.borrow_mut().insert((target, region), data);
        self
    }

    pub fn contents(&self, target: Target, region: Region) -> Option<Vec<u8>> {
        self.regions.borrow().get(&(target, region)).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.borrow().len()
    }

    pub fn written(&self) -> Vec<(Target, Region)> {
        self.writes.borrow().clone()
    }
}

impl FlashAccess for MemFlash {
    fn read(&self, target: Target, region: Region) -> UpdateResult<Vec<u8>> {
        self.regions
            .borrow()
            .get(&(target, region))
            .cloned()
            .ok_or_else(|| UpdateError::Tool {
                tool: "flash",
                reason: format!("no region {region} on {target}"),
            })
    }

    fn write(&self, target: Target, region: Region, data: &[u8]) -> UpdateResult<()> {
        self.regions
            .borrow_mut()
            .insert((target, region), data.to_vec());
        self.writes.borrow_mut().push((target, region));
        Ok(())
    }
}

/// Write-protect query with fixed answers and a probe counter.
pub struct CountingWp {
    switch: bool,
    protected: Vec<Target>,
    probes: Cell<usize>,
}

impl CountingWp {
    pub fn new(switch: bool, protected: &[Target]) -> Self {
        Self {
            switch,
            protected: protected.to_vec(),
            probes: Cell::new(0),
        }
    }

    /// Everything protected.
    pub fn protected() -> Self {
        Self::new(true, &Target::ALL)
    }

    /// Everything writable.
    pub fn unprotected() -> Self {
        Self::new(false, &[])
    }

    pub fn probes(&self) -> usize {
        self.probes.get()
    }
}

impl WpQuery for CountingWp {
    fn hardware_switch(&self) -> UpdateResult<bool> {
        self.probes.set(self.probes.get() + 1);
        Ok(self.switch)
    }

    fn software_range_enabled(&self, target: Target) -> UpdateResult<bool> {
        Ok(self.protected.contains(&target))
    }
}

/// Write-protect query whose hardware probe always fails.
pub struct FailingWp;

impl WpQuery for FailingWp {
    fn hardware_switch(&self) -> UpdateResult<bool> {
        Err(UpdateError::Tool {
            tool: "flash",
            reason: "write-protect status query failed".into(),
        })
    }

    fn software_range_enabled(&self, _target: Target) -> UpdateResult<bool> {
        Err(UpdateError::Tool {
            tool: "flash",
            reason: "write-protect status query failed".into(),
        })
    }
}

/// Compatibility facts with fixed answers.
#[derive(Default)]
pub struct FixedCompat {
    pub current_key: Option<RootKey>,
    pub target_key: Option<RootKey>,
    pub rw_info: RwFirmwareInfo,
    pub stored_version: Option<u32>,
}

impl FixedCompat {
    /// An environment the gate always accepts.
    pub fn compatible() -> Self {
        Self::default()
    }
}

impl CompatEnv for FixedCompat {
    fn current_root_key(&self) -> Result<Option<RootKey>, CompatError> {
        Ok(self.current_key.clone())
    }

    fn target_root_key(&self) -> Result<Option<RootKey>, CompatError> {
        Ok(self.target_key.clone())
    }

    fn target_rw_info(&self) -> Result<RwFirmwareInfo, CompatError> {
        Ok(self.rw_info.clone())
    }

    fn stored_rollback_version(&self) -> Result<Option<u32>, CompatError> {
        Ok(self.stored_version)
    }
}
