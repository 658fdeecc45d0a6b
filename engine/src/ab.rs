// Licensed under the Apache-2.0 license

//! The A/B trial-update engine.
//!
//! Two protocol variants drive the same decision table over different
//! persisted-state shapes. Both guarantee that a single invocation writes
//! at most one slot and never the slot the device is currently running
//! from; everything else is carried across reboots by the control
//! properties.

use vbfw_types::{MainSlot, Region, Target};

use crate::error::UpdateResult;
use crate::plan::UpdatePlan;
use crate::props::{PropKey, PropertyStore, PropertyStoreExt};

/// Boot cycles granted to an unconfirmed trial. The exact numbers are
/// policy, not protocol: `with_sync` just has to reserve more than one
/// extra boot for EC/PD software sync to complete.
#[derive(Clone, Copy, Debug)]
pub struct TryCounts {
    pub base: u32,
    pub with_sync: u32,
}

impl Default for TryCounts {
    fn default() -> Self {
        Self {
            base: 6,
            with_sync: 8,
        }
    }
}

/// Which persisted-state shape the device's boot firmware implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrialVariant {
    /// Older generation: only slot B can be trialed, via a shared
    /// decrement-per-boot counter. Counter exhaustion without confirmation
    /// means the trial is abandoned.
    Sequential,
    /// Current generation: either slot can be trialed via an explicit
    /// "try this next" hint, and confirmation records an explicit result
    /// instead of being inferred from the counter.
    ActiveSlot,
}

pub struct AbEngine<'a> {
    store: &'a dyn PropertyStore,
    variant: TrialVariant,
    counts: TryCounts,
}

impl<'a> AbEngine<'a> {
    pub fn new(store: &'a dyn PropertyStore, variant: TrialVariant, counts: TryCounts) -> Self {
        Self {
            store,
            variant,
            counts,
        }
    }

    /// Pick the variant the device reports through the control store.
    pub fn from_store(store: &'a dyn PropertyStore, counts: TryCounts) -> UpdateResult<Self> {
        let variant = if store.get_flag(PropKey::VbootTwo)? {
            TrialVariant::ActiveSlot
        } else {
            TrialVariant::Sequential
        };
        Ok(Self::new(store, variant, counts))
    }

    pub fn variant(&self) -> TrialVariant {
        self.variant
    }

    /// Slot the running firmware was loaded from. A store that has never
    /// been initialized reports no slot; a fresh device boots A.
    pub fn active_slot(&self) -> UpdateResult<MainSlot> {
        match self.store.get_slot(PropKey::ActiveMainSlot)? {
            Some(slot) => Ok(slot),
            None => {
                log::info!("active slot not reported; assuming slot A");
                Ok(MainSlot::A)
            }
        }
    }

    /// Whether a trial of `slot` is already armed for the next boot.
    pub fn trial_pending(&self, slot: MainSlot) -> UpdateResult<bool> {
        match self.variant {
            TrialVariant::Sequential => Ok(slot == MainSlot::B
                && self.store.get_u32(PropKey::TryB)?.unwrap_or(0) > 0),
            TrialVariant::ActiveSlot => {
                if self.store.get_slot(PropKey::TryNext)? != Some(slot) {
                    return Ok(false);
                }
                let count = self.store.get_u32(PropKey::TryCount)?.unwrap_or(0);
                let trying = self
                    .store
                    .get(PropKey::TryResult)?
                    .map(|v| v.trim() == "trying")
                    .unwrap_or(false);
                Ok(count > 0 || trying)
            }
        }
    }

    /// Decide what to write given the current slot contents and the bundled
    /// target image. `sync_pending` reserves extra boot cycles when EC/PD
    /// must follow the main update through software sync.
    pub fn plan_update(
        &self,
        slot_a: &[u8],
        slot_b: &[u8],
        target: &[u8],
        sync_pending: bool,
    ) -> UpdateResult<UpdatePlan> {
        let active = self.active_slot()?;
        let inactive = active.other();
        let (active_data, inactive_data) = match active {
            MainSlot::A => (slot_a, slot_b),
            MainSlot::B => (slot_b, slot_a),
        };

        let mut plan = UpdatePlan::new();

        if slot_a == target && slot_b == target {
            log::info!("both slots already hold the target firmware");
            return Ok(plan);
        }

        if active_data == target {
            // The running slot already has the update; the other copy is
            // stale and just gets repaired from the known-good content.
            log::info!("repairing slot {inactive} from active slot {active}");
            plan.push_write(Target::Main, inactive.region(), active_data.to_vec());
            return Ok(plan);
        }

        if self.variant == TrialVariant::Sequential && active == MainSlot::B {
            // Only slot B can host a sequential trial, and B is what we are
            // running from. Bring A up to the running content now; staging
            // the new image into B resumes on the next invocation, booted
            // from the repaired A.
            if slot_a != slot_b {
                plan.push_write(Target::Main, Region::A, active_data.to_vec());
            }
            log::info!("running from slot B; new image will be staged after reboot");
            plan.needs_reboot = true;
            return Ok(plan);
        }

        if inactive_data == target {
            if self.trial_pending(inactive)? {
                // Same update already in flight; re-arming would loop.
                log::info!("update already staged in slot {inactive}; trial pending");
                return Ok(plan);
            }
            // Staged earlier, booted, never confirmed: the trial failed.
            // Heal the slot from the running copy and keep running it.
            log::warn!(
                "slot {inactive} holds the target image but its trial was never \
                 confirmed; restoring from slot {active}"
            );
            plan.push_write(Target::Main, inactive.region(), active_data.to_vec());
            return Ok(plan);
        }

        log::info!("staging new firmware into slot {inactive}");
        plan.push_write(Target::Main, inactive.region(), target.to_vec());
        self.arm_trial(&mut plan, inactive, sync_pending);
        Ok(plan)
    }

    /// The `bootok` half: the running slot has proven itself, so the other
    /// slot is resynchronized to it and the trial state is retired.
    pub fn plan_confirm(&self, slot_a: &[u8], slot_b: &[u8]) -> UpdateResult<UpdatePlan> {
        let active = self.active_slot()?;
        let inactive = active.other();
        let (active_data, inactive_data) = match active {
            MainSlot::A => (slot_a, slot_b),
            MainSlot::B => (slot_b, slot_a),
        };

        let mut plan = UpdatePlan::new();
        if active_data != inactive_data {
            log::info!("boot confirmed; copying slot {active} over slot {inactive}");
            plan.push_write(Target::Main, inactive.region(), active_data.to_vec());
        }
        self.reset_trial_state(&mut plan, true);
        Ok(plan)
    }

    fn arm_trial(&self, plan: &mut UpdatePlan, slot: MainSlot, sync_pending: bool) {
        let count = if sync_pending {
            self.counts.with_sync
        } else {
            self.counts.base
        };
        match self.variant {
            TrialVariant::Sequential => {
                plan.set_prop(PropKey::TryB, count.to_string());
            }
            TrialVariant::ActiveSlot => {
                plan.set_prop(PropKey::TryNext, slot.name());
                plan.set_prop(PropKey::TryCount, count.to_string());
                plan.set_prop(PropKey::TryResult, "trying");
            }
        }
        plan.needs_reboot = true;
    }

    /// Retire trial state. `confirmed` records an explicit success on the
    /// active-slot variant; the sequential variant only knows counters.
    pub fn reset_trial_state(&self, plan: &mut UpdatePlan, confirmed: bool) {
        match self.variant {
            TrialVariant::Sequential => {
                plan.set_prop(PropKey::TryB, "0");
            }
            TrialVariant::ActiveSlot => {
                if confirmed {
                    plan.set_prop(PropKey::TryResult, "success");
                }
                plan.set_prop(PropKey::TryCount, "0");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemStore;

    const OLD: &[u8] = b"firmware-old";
    const NEW: &[u8] = b"firmware-new";
    const BAD: &[u8] = b"firmware-bad";

    fn mk_store(active: &str, vboot2: bool) -> MemStore {
        let store = MemStore::new().with(PropKey::ActiveMainSlot, active);
        if vboot2 {
            store.with(PropKey::VbootTwo, "1")
        } else {
            store
        }
    }

    fn prop<'p>(plan: &'p UpdatePlan, key: PropKey) -> Option<&'p str> {
        plan.props
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn up_to_date_slots_need_nothing() {
        for vboot2 in [false, true] {
            let store = mk_store("A", vboot2);
            let engine = AbEngine::from_store(&store, TryCounts::default()).unwrap();
            let plan = engine.plan_update(NEW, NEW, NEW, false).unwrap();
            assert!(plan.is_empty());
            assert!(!plan.needs_reboot);
        }
    }

    #[test]
    fn stale_inactive_slot_is_repaired_without_a_trial() {
        let store = mk_store("A", true);
        let engine = AbEngine::from_store(&store, TryCounts::default()).unwrap();
        let plan = engine.plan_update(NEW, OLD, NEW, false).unwrap();
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].region, Region::B);
        assert_eq!(plan.writes[0].data, NEW);
        assert!(plan.props.is_empty());
        assert!(!plan.needs_reboot);
    }

    #[test]
    fn new_update_stages_inactive_slot_and_arms_trial() {
        let store = mk_store("A", true);
        let engine = AbEngine::from_store(&store, TryCounts::default()).unwrap();
        let plan = engine.plan_update(OLD, OLD, NEW, false).unwrap();
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].region, Region::B);
        assert_eq!(plan.writes[0].data, NEW);
        assert_eq!(prop(&plan, PropKey::TryNext), Some("B"));
        assert_eq!(prop(&plan, PropKey::TryCount), Some("6"));
        assert_eq!(prop(&plan, PropKey::TryResult), Some("trying"));
        assert!(plan.needs_reboot);
    }

    #[test]
    fn software_sync_reserves_extra_boot_cycles() {
        let store = mk_store("A", true);
        let engine = AbEngine::from_store(&store, TryCounts::default()).unwrap();
        let plan = engine.plan_update(OLD, OLD, NEW, true).unwrap();
        assert_eq!(prop(&plan, PropKey::TryCount), Some("8"));

        let store = mk_store("A", false);
        let engine = AbEngine::from_store(&store, TryCounts::default()).unwrap();
        let plan = engine.plan_update(OLD, OLD, NEW, true).unwrap();
        assert_eq!(prop(&plan, PropKey::TryB), Some("8"));
    }

    #[test]
    fn pending_trial_is_not_rearmed() {
        let store = mk_store("A", true)
            .with(PropKey::TryNext, "B")
            .with(PropKey::TryCount, "5")
            .with(PropKey::TryResult, "trying");
        let engine = AbEngine::from_store(&store, TryCounts::default()).unwrap();
        let plan = engine.plan_update(OLD, NEW, NEW, false).unwrap();
        assert!(plan.is_empty());
        assert!(!plan.needs_reboot);

        let store = mk_store("A", false).with(PropKey::TryB, "3");
        let engine = AbEngine::from_store(&store, TryCounts::default()).unwrap();
        let plan = engine.plan_update(OLD, NEW, NEW, false).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn unconfirmed_trial_is_healed_from_the_active_slot() {
        // Trial state exhausted: the device fell back to A without bootok.
        let store = mk_store("A", true)
            .with(PropKey::TryNext, "B")
            .with(PropKey::TryCount, "0")
            .with(PropKey::TryResult, "failure");
        let engine = AbEngine::from_store(&store, TryCounts::default()).unwrap();
        let plan = engine.plan_update(OLD, NEW, NEW, false).unwrap();
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].region, Region::B);
        assert_eq!(plan.writes[0].data, OLD);
        assert!(!plan.needs_reboot);
    }

    #[test]
    fn active_slot_variant_stages_into_a_when_running_from_b() {
        let store = mk_store("B", true);
        let engine = AbEngine::from_store(&store, TryCounts::default()).unwrap();
        let plan = engine.plan_update(OLD, BAD, NEW, false).unwrap();
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].region, Region::A);
        assert_eq!(plan.writes[0].data, NEW);
        assert_eq!(prop(&plan, PropKey::TryNext), Some("A"));
        assert!(plan.needs_reboot);
    }

    #[test]
    fn running_from_b_repairs_a_when_update_already_applied() {
        for vboot2 in [false, true] {
            let store = mk_store("B", vboot2);
            let engine = AbEngine::from_store(&store, TryCounts::default()).unwrap();
            let plan = engine.plan_update(OLD, NEW, NEW, false).unwrap();
            assert_eq!(plan.writes.len(), 1);
            assert_eq!(plan.writes[0].region, Region::A);
            assert_eq!(plan.writes[0].data, NEW);
            assert!(!plan.needs_reboot);
        }
    }

    #[test]
    fn sequential_variant_defers_staging_while_running_from_b() {
        let store = mk_store("B", false);
        let engine = AbEngine::from_store(&store, TryCounts::default()).unwrap();
        let plan = engine.plan_update(OLD, BAD, NEW, false).unwrap();
        // A is repaired from B; the new image waits for the next invocation.
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].region, Region::A);
        assert_eq!(plan.writes[0].data, BAD);
        assert!(plan.props.is_empty());
        assert!(plan.needs_reboot);
    }

    #[test]
    fn at_most_one_write_and_never_the_active_slot() {
        let contents: [&[u8]; 3] = [OLD, NEW, BAD];
        for vboot2 in [false, true] {
            for active in ["A", "B"] {
                for a in contents {
                    for b in contents {
                        for t in contents {
                            let store = mk_store(active, vboot2);
                            let engine =
                                AbEngine::from_store(&store, TryCounts::default()).unwrap();
                            let plan = engine.plan_update(a, b, t, false).unwrap();
                            assert!(plan.writes.len() <= 1);
                            let active_region =
                                active.parse::<MainSlot>().unwrap().region();
                            for op in &plan.writes {
                                assert_ne!(op.region, active_region);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn confirm_converges_slots_and_records_success() {
        let store = mk_store("B", true);
        let engine = AbEngine::from_store(&store, TryCounts::default()).unwrap();
        let plan = engine.plan_confirm(OLD, NEW).unwrap();
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].region, Region::A);
        assert_eq!(plan.writes[0].data, NEW);
        assert_eq!(prop(&plan, PropKey::TryResult), Some("success"));
        assert_eq!(prop(&plan, PropKey::TryCount), Some("0"));
    }

    #[test]
    fn confirm_with_identical_slots_only_resets_counters() {
        let store = mk_store("A", false).with(PropKey::TryB, "4");
        let engine = AbEngine::from_store(&store, TryCounts::default()).unwrap();
        let plan = engine.plan_confirm(NEW, NEW).unwrap();
        assert!(plan.writes.is_empty());
        assert_eq!(prop(&plan, PropKey::TryB), Some("0"));
    }
}
