// Licensed under the Apache-2.0 license

//! Shared types for the verified-boot firmware updater: update targets, the
//! flash region vocabulary, declared firmware versions, and the GBB metadata
//! parser used to recover the root public key and hardware id from an image.

mod gbb;
mod region;
mod version;

pub use gbb::{
    extract_hwid, extract_root_key, patch_hwid, GbbError, GbbHeader, RootKey, VbPublicKeyHeader,
};
pub use region::{LayoutKind, MainSlot, PerTarget, Region, Target};
pub use version::{PreambleFlags, RwFirmwareInfo};
