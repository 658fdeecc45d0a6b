// Licensed under the Apache-2.0 license

use vbfw_types::{Region, Target};

use crate::error::UpdateResult;
use crate::flash::FlashAccess;
use crate::props::{PropKey, PropertyStore};

/// A single region write.
pub struct WriteOp {
    pub target: Target,
    pub region: Region,
    pub data: Vec<u8>,
}

/// The engine's output: flash writes, then control-property mutations, in
/// that order, plus whether the run must end in a reboot request.
///
/// A plan is built completely before anything is executed, so every
/// decision is made against the pre-update state of the device.
#[derive(Default)]
pub struct UpdatePlan {
    pub writes: Vec<WriteOp>,
    pub props: Vec<(PropKey, String)>,
    pub needs_reboot: bool,
}

impl UpdatePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.props.is_empty()
    }

    pub fn push_write(&mut self, target: Target, region: Region, data: Vec<u8>) {
        self.writes.push(WriteOp {
            target,
            region,
            data,
        });
    }

    pub fn set_prop(&mut self, key: PropKey, value: impl Into<String>) {
        self.props.push((key, value.into()));
    }

    pub fn merge(&mut self, other: UpdatePlan) {
        self.writes.extend(other.writes);
        self.props.extend(other.props);
        self.needs_reboot |= other.needs_reboot;
    }

    /// Apply the plan. Writes are strictly sequential; the flashing tool
    /// verifies each region before the next one starts. With `dry_run` set
    /// every mutation becomes a logged no-op.
    pub fn execute(
        &self,
        flash: &dyn FlashAccess,
        store: &dyn PropertyStore,
        dry_run: bool,
    ) -> UpdateResult<()> {
        for op in &self.writes {
            if dry_run {
                log::info!(
                    "dry run: would write {} bytes to {} region {}",
                    op.data.len(),
                    op.target,
                    op.region
                );
                continue;
            }
            log::info!(
                "writing {} bytes to {} region {}",
                op.data.len(),
                op.target,
                op.region
            );
            flash.write(op.target, op.region, &op.data)?;
        }

        for (key, value) in &self.props {
            if dry_run {
                log::info!("dry run: would set {}={}", key.name(), value);
                continue;
            }
            log::debug!("setting {}={}", key.name(), value);
            store.set(*key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemFlash, MemStore};

    #[test]
    fn dry_run_touches_nothing() {
        let flash = MemFlash::new().with_region(Target::Main, Region::B, vec![0u8; 4]);
        let store = MemStore::new();

        let mut plan = UpdatePlan::new();
        plan.push_write(Target::Main, Region::B, vec![1, 2, 3, 4]);
        plan.set_prop(PropKey::TryB, "6");
        plan.execute(&flash, &store, true).unwrap();

        assert_eq!(flash.write_count(), 0);
        assert_eq!(flash.contents(Target::Main, Region::B), Some(vec![0u8; 4]));
        assert_eq!(store.value(PropKey::TryB), None);
    }

    #[test]
    fn writes_precede_property_mutations() {
        let flash = MemFlash::new();
        let store = MemStore::new();

        let mut plan = UpdatePlan::new();
        plan.push_write(Target::Ec, Region::EcRw, vec![9]);
        plan.set_prop(PropKey::UpdateTries, "8");
        plan.execute(&flash, &store, false).unwrap();

        assert_eq!(flash.contents(Target::Ec, Region::EcRw), Some(vec![9]));
        assert_eq!(store.value(PropKey::UpdateTries).as_deref(), Some("8"));
    }
}
