// Licensed under the Apache-2.0 license

use std::collections::BTreeMap;

use vbfw_types::{Region, Target};

use crate::error::{UpdateError, UpdateResult};
use crate::props::{PropKey, PropertyStore};

/// The bundled firmware for one target: a version id plus pre-split region
/// payloads. For Main, the single RW payload is stored under slot A; slot B
/// always receives the same bytes, so the bundle never carries a separate B
/// image.
#[derive(Clone, Default)]
pub struct TargetImage {
    pub version: String,
    regions: BTreeMap<Region, Vec<u8>>,
}

impl TargetImage {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            regions: BTreeMap::new(),
        }
    }

    pub fn with_region(mut self, region: Region, data: Vec<u8>) -> Self {
        self.insert_region(region, data);
        self
    }

    pub fn insert_region(&mut self, region: Region, data: Vec<u8>) {
        self.regions.insert(region, data);
    }

    pub fn region(&self, region: Region) -> Option<&[u8]> {
        self.regions.get(&region).map(Vec::as_slice)
    }

    pub fn has(&self, region: Region) -> bool {
        self.regions.contains_key(&region)
    }

    /// Regions present in the bundle, in layout order.
    pub fn regions(&self) -> impl Iterator<Item = (Region, &[u8])> {
        self.regions.iter().map(|(r, d)| (*r, d.as_slice()))
    }

    pub fn require(&self, region: Region) -> UpdateResult<&[u8]> {
        self.region(region).ok_or_else(|| {
            UpdateError::bad_input(format!("bundle has no payload for region {region}"))
        })
    }
}

/// Everything the bundle offers, per target.
#[derive(Clone, Default)]
pub struct Bundle {
    pub main: Option<TargetImage>,
    pub ec: Option<TargetImage>,
    pub pd: Option<TargetImage>,
}

impl Bundle {
    pub fn image(&self, target: Target) -> Option<&TargetImage> {
        match target {
            Target::Main => self.main.as_ref(),
            Target::Ec => self.ec.as_ref(),
            Target::Pd => self.pd.as_ref(),
        }
    }

    pub fn image_mut(&mut self, target: Target) -> Option<&mut TargetImage> {
        match target {
            Target::Main => self.main.as_mut(),
            Target::Ec => self.ec.as_mut(),
            Target::Pd => self.pd.as_mut(),
        }
    }
}

/// Version ids reported by the currently running firmware.
#[derive(Clone, Default, Debug)]
pub struct CurrentVersions {
    pub main: Option<String>,
    pub ec: Option<String>,
    pub pd: Option<String>,
}

impl CurrentVersions {
    pub fn from_store(store: &dyn PropertyStore) -> UpdateResult<Self> {
        Ok(Self {
            main: store.get(PropKey::Fwid)?,
            ec: store.get(PropKey::EcVersion)?,
            pd: store.get(PropKey::PdVersion)?,
        })
    }

    pub fn get(&self, target: Target) -> Option<&str> {
        match target {
            Target::Main => self.main.as_deref(),
            Target::Ec => self.ec.as_deref(),
            Target::Pd => self.pd.as_deref(),
        }
    }
}

/// Which targets this run is allowed to touch.
#[derive(Clone, Copy, Debug)]
pub struct EnabledTargets {
    pub main: bool,
    pub ec: bool,
    pub pd: bool,
}

impl EnabledTargets {
    pub fn contains(self, target: Target) -> bool {
        match target {
            Target::Main => self.main,
            Target::Ec => self.ec,
            Target::Pd => self.pd,
        }
    }
}

impl Default for EnabledTargets {
    fn default() -> Self {
        Self {
            main: true,
            ec: false,
            pd: false,
        }
    }
}
