// Licensed under the Apache-2.0 license

use vbfw_types::{Region, Target};

use crate::error::UpdateResult;

/// Access to named flash regions, backed by the external flashing tool.
///
/// Writes are read-and-verify: a successful return means the region now
/// holds exactly `data`. The engine treats any failure as fatal because a
/// partial flash write cannot be trusted.
pub trait FlashAccess {
    fn read(&self, target: Target, region: Region) -> UpdateResult<Vec<u8>>;
    fn write(&self, target: Target, region: Region, data: &[u8]) -> UpdateResult<()>;
}
