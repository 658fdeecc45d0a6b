// Licensed under the Apache-2.0 license

//! Parser for the GBB region embedded in a Main firmware image.
//!
//! The GBB holds the root public key that RO firmware uses to validate RW
//! keyblocks, plus the preserved hardware id string. Only the header fields
//! up to the root key descriptor are consumed here; the rest of the region
//! is opaque to the updater.

use core::fmt;

use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, Unaligned};

/// "$GBB"
const GBB_SIGNATURE: [u8; 4] = *b"$GBB";

/// The key body is stored immediately after its 0x20-byte descriptor when
/// the key lives in the GBB; any other offset means a format we do not
/// understand.
const KEY_BODY_OFFSET: u64 = 0x20;

/// GBB headers are placed on 4-byte boundaries within the image.
const GBB_ALIGN: usize = 4;

#[derive(AsBytes, FromBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct GbbHeader {
    pub signature: [u8; 4],
    pub major_version: U16<LittleEndian>,
    pub minor_version: U16<LittleEndian>,
    pub header_size: U32<LittleEndian>,
    pub flags: U32<LittleEndian>,
    pub hwid_offset: U32<LittleEndian>,
    pub hwid_size: U32<LittleEndian>,
    pub rootkey_offset: U32<LittleEndian>,
    pub rootkey_size: U32<LittleEndian>,
}

#[derive(AsBytes, FromBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct VbPublicKeyHeader {
    pub key_offset: U64<LittleEndian>,
    pub key_size: U64<LittleEndian>,
    pub algorithm: U64<LittleEndian>,
    pub key_version: U64<LittleEndian>,
}

/// A root public key blob (descriptor plus body) lifted out of a GBB.
#[derive(Clone, PartialEq, Eq)]
pub struct RootKey {
    data: Vec<u8>,
}

impl RootKey {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Display for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let lead = &self.data[..self.data.len().min(8)];
        write!(f, "{} byte key {}..", self.data.len(), hex::encode(lead))
    }
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RootKey({self})")
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum GbbError {
    /// No GBB signature anywhere in the image.
    NotFound,
    /// A header or descriptor points outside the image.
    Truncated,
    /// The root key descriptor does not follow the stored-key convention.
    BadKeyFormat,
    /// The hardware id is absent, not UTF-8, or too long to patch in.
    BadHwid,
}

impl fmt::Display for GbbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GbbError::NotFound => write!(f, "no GBB header found in image"),
            GbbError::Truncated => write!(f, "GBB header points outside the image"),
            GbbError::BadKeyFormat => write!(f, "unrecognized root key format in GBB"),
            GbbError::BadHwid => write!(f, "bad hardware id in GBB"),
        }
    }
}

impl std::error::Error for GbbError {}

/// Locate the GBB header within an image by signature scan.
///
/// Firmware layouts differ in where the GBB sits inside the RO section, so
/// the header is found the way the key tool finds it: by scanning for the
/// signature at aligned offsets.
fn locate_gbb(image: &[u8]) -> Result<(usize, GbbHeader), GbbError> {
    let mut offset = 0;
    while offset + core::mem::size_of::<GbbHeader>() <= image.len() {
        if image[offset..offset + 4] == GBB_SIGNATURE {
            let header = GbbHeader::read_from_prefix(&image[offset..]).ok_or(GbbError::Truncated)?;
            return Ok((offset, header));
        }
        offset += GBB_ALIGN;
    }
    Err(GbbError::NotFound)
}

/// Extract the root public key from a firmware image containing a GBB.
pub fn extract_root_key(image: &[u8]) -> Result<RootKey, GbbError> {
    let (base, header) = locate_gbb(image)?;
    let gbb = &image[base..];

    let key_offs = header.rootkey_offset.get() as usize;
    let key_area = header.rootkey_size.get() as usize;
    let end = key_offs.checked_add(key_area).ok_or(GbbError::Truncated)?;
    if end > gbb.len() {
        return Err(GbbError::Truncated);
    }

    let desc =
        VbPublicKeyHeader::read_from_prefix(&gbb[key_offs..]).ok_or(GbbError::BadKeyFormat)?;
    if desc.key_offset.get() != KEY_BODY_OFFSET || desc.key_size.get() as usize > key_area {
        return Err(GbbError::BadKeyFormat);
    }

    let blob_len = KEY_BODY_OFFSET as usize + desc.key_size.get() as usize;
    if key_offs + blob_len > gbb.len() {
        return Err(GbbError::Truncated);
    }
    Ok(RootKey::new(gbb[key_offs..key_offs + blob_len].to_vec()))
}

/// Extract the preserved hardware id string.
pub fn extract_hwid(image: &[u8]) -> Result<String, GbbError> {
    let (base, header) = locate_gbb(image)?;
    let gbb = &image[base..];

    let offs = header.hwid_offset.get() as usize;
    let size = header.hwid_size.get() as usize;
    if size == 0 {
        return Err(GbbError::BadHwid);
    }
    let end = offs.checked_add(size).ok_or(GbbError::Truncated)?;
    if end > gbb.len() {
        return Err(GbbError::Truncated);
    }

    let raw = &gbb[offs..end];
    let text = raw.split(|b| *b == 0).next().unwrap_or(&[]);
    core::str::from_utf8(text)
        .map(str::to_owned)
        .map_err(|_| GbbError::BadHwid)
}

/// Write a hardware id into an image's GBB, NUL-padding the field.
///
/// Used before factory writes so that a full RO replacement does not clobber
/// the board identity programmed at manufacturing.
pub fn patch_hwid(image: &mut [u8], hwid: &str) -> Result<(), GbbError> {
    let (base, header) = locate_gbb(image)?;

    let offs = base + header.hwid_offset.get() as usize;
    let size = header.hwid_size.get() as usize;
    let end = offs.checked_add(size).ok_or(GbbError::Truncated)?;
    if end > image.len() {
        return Err(GbbError::Truncated);
    }
    // Leave room for the terminating NUL.
    if hwid.len() + 1 > size {
        return Err(GbbError::BadHwid);
    }

    let field = &mut image[offs..end];
    field.fill(0);
    field[..hwid.len()].copy_from_slice(hwid.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HWID_OFFSET: u32 = 0x40;
    const HWID_SIZE: u32 = 0x20;
    const ROOTKEY_OFFSET: u32 = 0x60;
    const KEY_BODY_SIZE: u64 = 0x40;

    fn sample_gbb(hwid: &str, key_byte: u8) -> Vec<u8> {
        let mut gbb = vec![0u8; 0x200];
        let header = GbbHeader {
            signature: GBB_SIGNATURE,
            major_version: 1.into(),
            minor_version: 1.into(),
            header_size: 0x80.into(),
            flags: 0.into(),
            hwid_offset: HWID_OFFSET.into(),
            hwid_size: HWID_SIZE.into(),
            rootkey_offset: ROOTKEY_OFFSET.into(),
            rootkey_size: 0x100.into(),
        };
        gbb[..core::mem::size_of::<GbbHeader>()].copy_from_slice(header.as_bytes());
        gbb[HWID_OFFSET as usize..HWID_OFFSET as usize + hwid.len()]
            .copy_from_slice(hwid.as_bytes());

        let desc = VbPublicKeyHeader {
            key_offset: KEY_BODY_OFFSET.into(),
            key_size: KEY_BODY_SIZE.into(),
            algorithm: 7.into(),
            key_version: 1.into(),
        };
        let desc_at = ROOTKEY_OFFSET as usize;
        gbb[desc_at..desc_at + core::mem::size_of::<VbPublicKeyHeader>()]
            .copy_from_slice(desc.as_bytes());
        let body_at = desc_at + KEY_BODY_OFFSET as usize;
        for b in &mut gbb[body_at..body_at + KEY_BODY_SIZE as usize] {
            *b = key_byte;
        }
        gbb
    }

    #[test]
    fn root_key_roundtrip() {
        // Embed the GBB at a non-zero aligned offset, as in a real RO image.
        let mut image = vec![0u8; 0x100];
        image.extend(sample_gbb("SAMPLE BOARD A1B-C2D", 0xa5));

        let key = extract_root_key(&image).unwrap();
        assert_eq!(
            key.as_bytes().len(),
            KEY_BODY_OFFSET as usize + KEY_BODY_SIZE as usize
        );
        assert_eq!(key.as_bytes()[KEY_BODY_OFFSET as usize], 0xa5);

        let other = extract_root_key(&sample_gbb("SAMPLE BOARD A1B-C2D", 0x5a)).unwrap();
        assert_ne!(key, other);
    }

    #[test]
    fn missing_gbb() {
        assert_eq!(extract_root_key(&[0u8; 0x400]), Err(GbbError::NotFound));
    }

    #[test]
    fn truncated_key_area() {
        let gbb = sample_gbb("X", 1);
        // Chop the image off inside the key area.
        assert_eq!(
            extract_root_key(&gbb[..ROOTKEY_OFFSET as usize + 8]),
            Err(GbbError::Truncated)
        );
    }

    #[test]
    fn hwid_extraction_and_patch() {
        let mut gbb = sample_gbb("SAMPLE BOARD A1B-C2D", 1);
        assert_eq!(extract_hwid(&gbb).unwrap(), "SAMPLE BOARD A1B-C2D");

        patch_hwid(&mut gbb, "OTHER BOARD").unwrap();
        assert_eq!(extract_hwid(&gbb).unwrap(), "OTHER BOARD");

        // Too long for the field.
        let long = "X".repeat(HWID_SIZE as usize);
        assert_eq!(patch_hwid(&mut gbb, &long), Err(GbbError::BadHwid));
    }
}
