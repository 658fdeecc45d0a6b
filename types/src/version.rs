// Licensed under the Apache-2.0 license

use bitflags::bitflags;

bitflags! {
    /// Preamble flags declared by a signed RW firmware image.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PreambleFlags: u32 {
        /// The image boots through the RO-normal path: the keyblock is
        /// re-signed but the executing code, and therefore the reported
        /// firmware id, do not change.
        const USE_RO_NORMAL = 1 << 0;
    }
}

/// Versions and flags recovered from a verified RW keyblock.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RwFirmwareInfo {
    /// Declared data key version.
    pub data_key_version: u32,

    /// Declared firmware body version.
    pub firmware_version: u32,

    /// Preamble flags.
    pub flags: PreambleFlags,
}

impl RwFirmwareInfo {
    /// The combined value compared against the TPM rollback counter.
    ///
    /// Key version occupies the high half so that a key rollover always
    /// dominates a firmware version bump.
    pub fn rollback_version(&self) -> u32 {
        (self.data_key_version << 16) | (self.firmware_version & 0xFFFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_encoding() {
        let info = RwFirmwareInfo {
            data_key_version: 2,
            firmware_version: 1,
            flags: PreambleFlags::empty(),
        };
        assert_eq!(info.rollback_version(), 0x0002_0001);

        let info = RwFirmwareInfo {
            data_key_version: 3,
            firmware_version: 0x1_0005,
            flags: PreambleFlags::empty(),
        };
        // Firmware version is truncated to its low 16 bits.
        assert_eq!(info.rollback_version(), 0x0003_0005);
    }
}
