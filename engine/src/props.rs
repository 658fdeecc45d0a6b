// Licensed under the Apache-2.0 license

//! Typed access to the device's persistent firmware-control properties.

use core::str::FromStr;

use vbfw_types::MainSlot;

use crate::error::{UpdateError, UpdateResult};

/// Keys in the persisted control store.
///
/// The two TPM-backed rollback counters are read-only to the updater: they
/// are compared against, never written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PropKey {
    /// Slot the running main firmware was loaded from ("A"/"B").
    ActiveMainSlot,
    /// Boot type of the running firmware (normal/developer/recovery).
    MainBootType,
    /// Whether the device runs the active-slot trial protocol ("1").
    VbootTwo,
    /// Sequential-variant trial counter for slot B.
    TryB,
    /// Active-slot-variant hint naming the slot to try next.
    TryNext,
    /// Active-slot-variant count of boots granted to the trial.
    TryCount,
    /// Active-slot-variant trial outcome (trying/success/failure).
    TryResult,
    /// Boot cycles reserved for EC/PD software sync after a main update.
    UpdateTries,
    /// Developer boot-from-removable-media toggle.
    DevBootUsb,
    /// Hardware write-protect switch state sampled at boot.
    WpSwitchBoot,
    /// Monotonic firmware rollback counter held in the TPM.
    TpmFirmwareVersion,
    /// Monotonic kernel rollback counter held in the TPM.
    TpmKernelVersion,
    /// Firmware id reported by the running main firmware.
    Fwid,
    /// Version reported by the running EC firmware.
    EcVersion,
    /// Version reported by the running PD firmware.
    PdVersion,
}

impl PropKey {
    pub fn name(self) -> &'static str {
        match self {
            PropKey::ActiveMainSlot => "mainfw_act",
            PropKey::MainBootType => "mainfw_type",
            PropKey::VbootTwo => "fw_vboot2",
            PropKey::TryB => "fwb_tries",
            PropKey::TryNext => "fw_try_next",
            PropKey::TryCount => "fw_try_count",
            PropKey::TryResult => "fw_result",
            PropKey::UpdateTries => "fwupdate_tries",
            PropKey::DevBootUsb => "dev_boot_usb",
            PropKey::WpSwitchBoot => "wpsw_boot",
            PropKey::TpmFirmwareVersion => "tpm_fwver",
            PropKey::TpmKernelVersion => "tpm_kernver",
            PropKey::Fwid => "fwid",
            PropKey::EcVersion => "ec_version",
            PropKey::PdVersion => "pd_version",
        }
    }
}

/// The persisted key/value store surviving reboots.
///
/// A store queried before it is initialized (freshly wiped or non-stock
/// device) reports `None` rather than erroring.
pub trait PropertyStore {
    fn get(&self, key: PropKey) -> UpdateResult<Option<String>>;
    fn set(&self, key: PropKey, value: &str) -> UpdateResult<()>;
}

/// Typed readers over the string-valued store.
pub trait PropertyStoreExt: PropertyStore {
    fn get_u32(&self, key: PropKey) -> UpdateResult<Option<u32>> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        let raw = raw.trim();
        let parsed = match raw.strip_prefix("0x") {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => raw.parse(),
        };
        parsed.map(Some).map_err(|_| UpdateError::Property {
            key: key.name(),
            reason: format!("expected a number, got {raw:?}"),
        })
    }

    fn get_slot(&self, key: PropKey) -> UpdateResult<Option<MainSlot>> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        MainSlot::from_str(raw.trim())
            .map(Some)
            .map_err(|reason| UpdateError::Property {
                key: key.name(),
                reason,
            })
    }

    fn get_flag(&self, key: PropKey) -> UpdateResult<bool> {
        Ok(matches!(self.get(key)?.as_deref().map(str::trim), Some("1")))
    }
}

impl<T: PropertyStore + ?Sized> PropertyStoreExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemStore;

    #[test]
    fn numeric_properties_accept_hex_and_decimal() {
        let store = MemStore::new()
            .with(PropKey::TpmFirmwareVersion, "0x00030003")
            .with(PropKey::TryB, "6");
        assert_eq!(
            store.get_u32(PropKey::TpmFirmwareVersion).unwrap(),
            Some(0x0003_0003)
        );
        assert_eq!(store.get_u32(PropKey::TryB).unwrap(), Some(6));
        assert_eq!(store.get_u32(PropKey::TryCount).unwrap(), None);
    }

    #[test]
    fn garbage_numeric_value_is_a_property_error() {
        let store = MemStore::new().with(PropKey::TryB, "many");
        assert!(matches!(
            store.get_u32(PropKey::TryB),
            Err(UpdateError::Property { key: "fwb_tries", .. })
        ));
    }

    #[test]
    fn slot_property() {
        let store = MemStore::new().with(PropKey::ActiveMainSlot, "B");
        assert_eq!(
            store.get_slot(PropKey::ActiveMainSlot).unwrap(),
            Some(MainSlot::B)
        );
        let store = MemStore::new().with(PropKey::ActiveMainSlot, "recovery");
        assert!(store.get_slot(PropKey::ActiveMainSlot).is_err());
    }
}
