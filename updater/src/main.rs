// Licensed under the Apache-2.0 license

//! Command-line entry point for the verified-boot firmware updater.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use vbfw_engine::{
    Bundle, CurrentVersions, EnabledTargets, Mode, TryCounts, UpdateContext, UpdateError,
    UpdateResult, WpOracle, WpOverride,
};
use vbfw_host::{load_bundle, Crossystem, Flashrom, HostCompatEnv, HostWpQuery, InstanceLock};
use vbfw_types::{extract_hwid, patch_hwid, Region, Target};

#[derive(Parser)]
#[command(name = "vbfw-updater", about = "Verified-boot firmware updater", version)]
struct Args {
    /// Update mode: startup, bootok, autoupdate, todev, tonormal, recovery,
    /// factory_install, factory_final, incompatible_update or
    /// fast_version_check
    #[arg(long)]
    mode: String,

    /// Firmware bundle directory (holds manifest.toml and payloads)
    #[arg(long)]
    bundle: Option<PathBuf>,

    /// Leave the main firmware alone
    #[arg(long)]
    no_main: bool,

    /// Also service the EC firmware
    #[arg(long)]
    ec: bool,

    /// Also service the PD firmware
    #[arg(long)]
    pd: bool,

    /// Override the write-protect decision instead of probing the device
    #[arg(long, value_enum)]
    wp: Option<WpArg>,

    /// Run every decision but make all writes no-ops
    #[arg(long)]
    dry_run: bool,

    /// Lock file guarding against concurrent updater instances
    #[arg(long, default_value = "/run/vbfw-updater.lock")]
    lock_file: PathBuf,

    /// Backup of the current main image, taken before destructive modes
    #[arg(long, default_value = "/var/tmp/vbfw-main-backup.bin")]
    backup_file: PathBuf,

    /// Log tool invocations as well
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum WpArg {
    On,
    Off,
}

fn main() {
    let args = Args::parse();
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = SimpleLogger::new().with_level(level).init();

    if let Err(err) = run(&args) {
        match err {
            UpdateError::NeedsReboot => log::info!("{err}"),
            ref err => log::error!("{err}"),
        }
        std::process::exit(err.exit_code());
    }
}

fn run(args: &Args) -> UpdateResult<()> {
    let mode: Mode = args.mode.parse()?;
    let _lock = InstanceLock::acquire(&args.lock_file)?;

    let store = Crossystem::new();
    let flash = Flashrom::new();

    let (mut bundle, counts) = if mode.needs_bundle() {
        let dir = args.bundle.as_deref().ok_or_else(|| {
            UpdateError::bad_input(format!("mode {mode} requires --bundle <DIR>"))
        })?;
        let loaded = load_bundle(dir)?;
        (loaded.bundle, loaded.counts)
    } else {
        (Bundle::default(), TryCounts::default())
    };

    let targets = EnabledTargets {
        main: !args.no_main,
        ec: args.ec,
        pd: args.pd,
    };

    if targets.main && !args.dry_run {
        if mode == Mode::FactoryInstall {
            preserve_hwid(&flash, &mut bundle)?;
        }
        if matches!(mode, Mode::FactoryInstall | Mode::IncompatibleUpdate) {
            back_up_main(&flash, &args.backup_file)?;
        }
    }

    let wp_query = HostWpQuery::new(&store, &flash);
    let override_mode = match args.wp {
        Some(WpArg::On) => WpOverride::ForceOn,
        Some(WpArg::Off) => WpOverride::ForceOff,
        None => WpOverride::Unset,
    };
    let wp = WpOracle::new(&wp_query, override_mode);
    let compat = HostCompatEnv::new(&flash, &store, &bundle);
    let current = CurrentVersions::from_store(&store)?;

    let ctx = UpdateContext {
        store: &store,
        flash: &flash,
        wp: &wp,
        compat: &compat,
        bundle: &bundle,
        current: &current,
        targets,
        counts,
        dry_run: args.dry_run,
    };
    vbfw_engine::run(mode, &ctx)
}

/// Re-inject the device's hardware id into the bundled RO image so that a
/// factory write does not clobber the board identity.
fn preserve_hwid(flash: &Flashrom, bundle: &mut Bundle) -> UpdateResult<()> {
    use vbfw_engine::FlashAccess;

    let Some(img) = bundle.image_mut(Target::Main) else {
        return Ok(());
    };
    let Some(mut ro) = img.region(Region::Ro).map(<[u8]>::to_vec) else {
        return Ok(());
    };

    let device_ro = flash.read(Target::Main, Region::Ro)?;
    let hwid = match extract_hwid(&device_ro) {
        Ok(hwid) => hwid,
        Err(err) => {
            log::warn!("device hardware id unreadable ({err}); keeping the bundle's");
            return Ok(());
        }
    };
    patch_hwid(&mut ro, &hwid).map_err(|e| UpdateError::Tool {
        tool: "gbb",
        reason: e.to_string(),
    })?;
    log::info!("preserving device hardware id {hwid:?}");
    img.insert_region(Region::Ro, ro);
    Ok(())
}

/// Keep a copy of the running main image before a destructive rewrite.
fn back_up_main(flash: &Flashrom, path: &Path) -> UpdateResult<()> {
    log::info!("backing up current main firmware to {}", path.display());
    let image = flash.read_whole(Target::Main)?;
    fs::write(path, image).map_err(|e| UpdateError::Tool {
        tool: "backup",
        reason: format!("{}: {e}", path.display()),
    })
}
