// Licensed under the Apache-2.0 license

//! Boot-time write-protection state, derived once per run and cached.

use core::cell::RefCell;

use vbfw_types::{PerTarget, Target};

use crate::error::UpdateResult;

/// Operator override for the write-protect decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WpOverride {
    /// Treat every target as protected.
    ForceOn,
    /// Treat every target as unprotected.
    ForceOff,
    #[default]
    Unset,
}

/// Hardware-level queries behind the oracle.
pub trait WpQuery {
    /// State of the hardware write-protect switch.
    fn hardware_switch(&self) -> UpdateResult<bool>;

    /// Whether the software protect range covers the target's RO section.
    /// Only meaningful while the hardware switch is engaged.
    fn software_range_enabled(&self, target: Target) -> UpdateResult<bool>;
}

/// Per-run write-protection oracle.
///
/// Results are cached because the underlying queries take hundreds of
/// milliseconds on EC/PD class devices; modes that never consult the value
/// never pay for the probe.
pub struct WpOracle<'a> {
    query: &'a dyn WpQuery,
    override_mode: WpOverride,
    cache: RefCell<PerTarget<bool>>,
}

impl<'a> WpOracle<'a> {
    pub fn new(query: &'a dyn WpQuery, override_mode: WpOverride) -> Self {
        Self {
            query,
            override_mode,
            cache: RefCell::new(PerTarget::default()),
        }
    }

    /// Whether the target's RO section must be treated as untouchable.
    ///
    /// A failing probe fails closed: an unreadable protection state is
    /// reported as protected, never as safe to write.
    pub fn is_write_protected(&self, target: Target) -> bool {
        match self.override_mode {
            WpOverride::ForceOn => return true,
            WpOverride::ForceOff => return false,
            WpOverride::Unset => {}
        }

        if let Some(cached) = self.cache.borrow().get(target) {
            return cached;
        }

        let state = match self.probe(target) {
            Ok(state) => state,
            Err(err) => {
                log::warn!("write-protect probe for {target} failed ({err}); assuming protected");
                true
            }
        };
        self.cache.borrow_mut().set(target, state);
        state
    }

    fn probe(&self, target: Target) -> UpdateResult<bool> {
        if !self.query.hardware_switch()? {
            return Ok(false);
        }
        self.query.software_range_enabled(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingWp, FailingWp};

    #[test]
    fn override_wins_without_probing() {
        let query = CountingWp::protected();
        let oracle = WpOracle::new(&query, WpOverride::ForceOff);
        assert!(!oracle.is_write_protected(Target::Main));
        let oracle = WpOracle::new(&query, WpOverride::ForceOn);
        assert!(oracle.is_write_protected(Target::Ec));
        assert_eq!(query.probes(), 0);
    }

    #[test]
    fn switch_disengaged_means_unprotected() {
        let query = CountingWp::new(false, &[]);
        let oracle = WpOracle::new(&query, WpOverride::Unset);
        assert!(!oracle.is_write_protected(Target::Main));
    }

    #[test]
    fn switch_engaged_consults_software_range() {
        let query = CountingWp::new(true, &[Target::Main]);
        let oracle = WpOracle::new(&query, WpOverride::Unset);
        assert!(oracle.is_write_protected(Target::Main));
        assert!(!oracle.is_write_protected(Target::Ec));
    }

    #[test]
    fn probe_failure_fails_closed() {
        let query = FailingWp;
        let oracle = WpOracle::new(&query, WpOverride::Unset);
        assert!(oracle.is_write_protected(Target::Pd));
    }

    #[test]
    fn probes_are_cached_per_target() {
        let query = CountingWp::new(true, &[Target::Ec]);
        let oracle = WpOracle::new(&query, WpOverride::Unset);
        oracle.is_write_protected(Target::Ec);
        oracle.is_write_protected(Target::Ec);
        oracle.is_write_protected(Target::Ec);
        assert_eq!(query.probes(), 1);
    }
}
