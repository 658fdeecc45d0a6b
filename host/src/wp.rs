// Licensed under the Apache-2.0 license

use vbfw_engine::{PropKey, PropertyStore, UpdateResult, WpQuery};
use vbfw_types::Target;

use crate::crossystem::Crossystem;
use crate::flashrom::Flashrom;

/// Boot-time write-protect queries: the hardware switch comes from the
/// property store, the software protect range from the flashing tool.
pub struct HostWpQuery<'a> {
    store: &'a Crossystem,
    flash: &'a Flashrom,
}

impl<'a> HostWpQuery<'a> {
    pub fn new(store: &'a Crossystem, flash: &'a Flashrom) -> Self {
        Self { store, flash }
    }
}

impl WpQuery for HostWpQuery<'_> {
    fn hardware_switch(&self) -> UpdateResult<bool> {
        match self.store.get(PropKey::WpSwitchBoot)? {
            Some(value) => Ok(value.trim() == "1"),
            None => {
                // A store that cannot say is treated as switch engaged; the
                // software range query then settles the question.
                log::debug!("wpsw_boot not reported; assuming the switch is engaged");
                Ok(true)
            }
        }
    }

    fn software_range_enabled(&self, target: Target) -> UpdateResult<bool> {
        self.flash.wp_enabled(target)
    }
}
