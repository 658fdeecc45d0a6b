// Licensed under the Apache-2.0 license

//! Wrapper for the signature-verification tool.
//!
//! A Main RW slot is a keyblock followed by the firmware body. The tool
//! checks the keyblock signature chain against the root public key and
//! reports the declared key version, firmware version and preamble flags.

use std::fs;
use std::process::Command;

use vbfw_engine::UpdateResult;
use vbfw_types::{PreambleFlags, RootKey, RwFirmwareInfo};

use crate::run_tool_stdout;

const VBUTIL: &str = "vbutil_firmware";

/// Size of the keyblock at the head of each RW slot.
pub const KEYBLOCK_SIZE: usize = 0x10000;

pub struct VbutilFirmware;

impl VbutilFirmware {
    pub fn new() -> Self {
        Self
    }

    /// Verify a slot payload against `root_key` and recover its declared
    /// versions and preamble flags.
    pub fn rw_info(&self, slot_payload: &[u8], root_key: &RootKey) -> UpdateResult<RwFirmwareInfo> {
        if slot_payload.len() <= KEYBLOCK_SIZE {
            return Err(tool_err(format!(
                "RW payload too short for a keyblock: {} bytes",
                slot_payload.len()
            )));
        }

        let dir = tempfile::tempdir().map_err(|e| tool_err(e.to_string()))?;
        let keyblock = dir.path().join("vblock.bin");
        let body = dir.path().join("body.bin");
        let pubkey = dir.path().join("root.vbpubk");
        fs::write(&keyblock, &slot_payload[..KEYBLOCK_SIZE])
            .and_then(|_| fs::write(&body, &slot_payload[KEYBLOCK_SIZE..]))
            .and_then(|_| fs::write(&pubkey, root_key.as_bytes()))
            .map_err(|e| tool_err(e.to_string()))?;

        let out = run_tool_stdout(
            VBUTIL,
            Command::new(VBUTIL)
                .arg("--verify")
                .arg(&keyblock)
                .arg("--signpubkey")
                .arg(&pubkey)
                .arg("--fv")
                .arg(&body),
        )?;
        parse_verify_output(&out)
    }
}

impl Default for VbutilFirmware {
    fn default() -> Self {
        Self::new()
    }
}

fn tool_err(reason: String) -> vbfw_engine::UpdateError {
    vbfw_engine::UpdateError::Tool {
        tool: VBUTIL,
        reason,
    }
}

fn parse_verify_output(out: &str) -> UpdateResult<RwFirmwareInfo> {
    let mut data_key_version = None;
    let mut firmware_version = None;
    let mut flags = None;

    for line in out.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match label.trim() {
            "Data key version" => data_key_version = parse_number(value),
            "Firmware version" => firmware_version = parse_number(value),
            "Preamble flags" => flags = parse_number(value),
            _ => {}
        }
    }

    match (data_key_version, firmware_version) {
        (Some(data_key_version), Some(firmware_version)) => Ok(RwFirmwareInfo {
            data_key_version,
            firmware_version,
            flags: PreambleFlags::from_bits_truncate(flags.unwrap_or(0)),
        }),
        _ => Err(tool_err(format!(
            "verification output is missing version fields: {}",
            out.trim()
        ))),
    }
}

fn parse_number(value: &str) -> Option<u32> {
    match value.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verification_report() {
        let out = "Keyblock:\n\
                   \x20 Signature:           valid\n\
                   \x20 Data key version:    2\n\
                   Preamble:\n\
                   \x20 Firmware version:    1\n\
                   \x20 Preamble flags:      1\n\
                   Body verification succeeded.\n";
        let info = parse_verify_output(out).unwrap();
        assert_eq!(info.data_key_version, 2);
        assert_eq!(info.firmware_version, 1);
        assert!(info.flags.contains(PreambleFlags::USE_RO_NORMAL));
        assert_eq!(info.rollback_version(), 0x0002_0001);
    }

    #[test]
    fn missing_versions_are_rejected() {
        assert!(parse_verify_output("Body verification succeeded.\n").is_err());
    }
}
