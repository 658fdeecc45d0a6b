// Licensed under the Apache-2.0 license

//! Loader for the packed firmware bundle.
//!
//! A bundle directory holds `manifest.toml` plus pre-split region payloads.
//! The manifest names, per target, the version id and the payload file for
//! each region; the Main RW payload is listed once under `A` and serves
//! both slots.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_derive::Deserialize;
use vbfw_engine::{Bundle, TargetImage, TryCounts, UpdateError, UpdateResult};
use vbfw_types::{Region, Target};

const MANIFEST: &str = "manifest.toml";

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    main: Option<ManifestTarget>,
    ec: Option<ManifestTarget>,
    pd: Option<ManifestTarget>,
    try_counts: Option<ManifestCounts>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestTarget {
    version: String,
    regions: BTreeMap<String, PathBuf>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestCounts {
    base: u32,
    with_sync: u32,
}

/// A parsed bundle plus the try-count policy it ships with.
pub struct LoadedBundle {
    pub bundle: Bundle,
    pub counts: TryCounts,
}

pub fn load_bundle(dir: &Path) -> UpdateResult<LoadedBundle> {
    let manifest_path = dir.join(MANIFEST);
    let text = fs::read_to_string(&manifest_path).map_err(|e| {
        UpdateError::bad_input(format!("cannot read {}: {e}", manifest_path.display()))
    })?;
    let manifest: Manifest = toml::from_str(&text).map_err(|e| {
        UpdateError::bad_input(format!("malformed {}: {e}", manifest_path.display()))
    })?;

    let mut bundle = Bundle::default();
    bundle.main = load_target(dir, Target::Main, manifest.main)?;
    bundle.ec = load_target(dir, Target::Ec, manifest.ec)?;
    bundle.pd = load_target(dir, Target::Pd, manifest.pd)?;

    let counts = match manifest.try_counts {
        Some(c) => TryCounts {
            base: c.base,
            with_sync: c.with_sync,
        },
        None => TryCounts::default(),
    };

    Ok(LoadedBundle { bundle, counts })
}

fn load_target(
    dir: &Path,
    target: Target,
    section: Option<ManifestTarget>,
) -> UpdateResult<Option<TargetImage>> {
    let Some(section) = section else {
        return Ok(None);
    };

    let mut image = TargetImage::new(section.version);
    for (name, rel_path) in &section.regions {
        let region: Region = name
            .parse()
            .map_err(|e: String| UpdateError::bad_input(format!("{target} bundle: {e}")))?;
        if region.target() != target {
            return Err(UpdateError::bad_input(format!(
                "region {region} does not belong to the {target} firmware"
            )));
        }
        if region == Region::B {
            return Err(UpdateError::bad_input(
                "slot B is always written from the A payload; list it as A",
            ));
        }
        let path = dir.join(rel_path);
        let data = fs::read(&path).map_err(|e| {
            UpdateError::bad_input(format!("cannot read {}: {e}", path.display()))
        })?;
        image.insert_region(region, data);
    }

    let required = match target {
        Target::Main => Region::A,
        Target::Ec => Region::EcRw,
        Target::Pd => Region::PdRw,
    };
    if !image.has(required) {
        return Err(UpdateError::bad_input(format!(
            "{target} bundle is missing its {required} payload"
        )));
    }
    Ok(Some(image))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_bundle(dir: &Path, manifest: &str) {
        fs::write(dir.join(MANIFEST), manifest).unwrap();
        fs::write(dir.join("main_rw.bin"), b"main-rw").unwrap();
        fs::write(dir.join("main_ro.bin"), b"main-ro").unwrap();
        fs::write(dir.join("ec_rw.bin"), b"ec-rw").unwrap();
    }

    #[test]
    fn loads_manifest_and_payloads() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(
            dir.path(),
            r#"
            [main]
            version = "Board.2.0"
            [main.regions]
            RO = "main_ro.bin"
            A = "main_rw.bin"

            [ec]
            version = "ec.2.0"
            [ec.regions]
            EC_RW = "ec_rw.bin"

            [try_counts]
            base = 4
            with_sync = 7
            "#,
        );

        let loaded = load_bundle(dir.path()).unwrap();
        let main = loaded.bundle.main.unwrap();
        assert_eq!(main.version, "Board.2.0");
        assert_eq!(main.region(Region::A), Some(b"main-rw".as_slice()));
        assert_eq!(main.region(Region::Ro), Some(b"main-ro".as_slice()));
        let ec = loaded.bundle.ec.unwrap();
        assert_eq!(ec.region(Region::EcRw), Some(b"ec-rw".as_slice()));
        assert!(loaded.bundle.pd.is_none());
        assert_eq!(loaded.counts.base, 4);
        assert_eq!(loaded.counts.with_sync, 7);
    }

    #[test]
    fn foreign_region_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(
            dir.path(),
            r#"
            [main]
            version = "Board.2.0"
            [main.regions]
            A = "main_rw.bin"
            EC_RW = "ec_rw.bin"
            "#,
        );
        assert!(matches!(
            load_bundle(dir.path()),
            Err(UpdateError::BadInput { .. })
        ));
    }

    #[test]
    fn missing_rw_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(
            dir.path(),
            r#"
            [main]
            version = "Board.2.0"
            [main.regions]
            RO = "main_ro.bin"
            "#,
        );
        assert!(matches!(
            load_bundle(dir.path()),
            Err(UpdateError::BadInput { .. })
        ));
    }

    #[test]
    fn explicit_slot_b_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(
            dir.path(),
            r#"
            [main]
            version = "Board.2.0"
            [main.regions]
            A = "main_rw.bin"
            B = "main_rw.bin"
            "#,
        );
        assert!(matches!(
            load_bundle(dir.path()),
            Err(UpdateError::BadInput { .. })
        ));
    }
}
