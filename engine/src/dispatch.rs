// Licensed under the Apache-2.0 license

//! Mode dispatch: which handler runs, and whether the compatibility gate
//! runs first.

use core::fmt;
use core::str::FromStr;

use vbfw_types::{Region, Target};
use vbfw_verify::{CompatChecker, CompatEnv, CompatVerdict};

use crate::ab::{AbEngine, TryCounts};
use crate::bundle::{Bundle, CurrentVersions, EnabledTargets};
use crate::error::{UpdateError, UpdateResult};
use crate::flash::FlashAccess;
use crate::plan::UpdatePlan;
use crate::props::{PropKey, PropertyStore, PropertyStoreExt};
use crate::sequencer;
use crate::wp::WpOracle;

/// Update modes selectable from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Startup,
    BootOk,
    AutoUpdate,
    Recovery,
    IncompatibleUpdate,
    FactoryInstall,
    FactoryFinal,
    ToDev,
    ToNormal,
    FastVersionCheck,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::Startup => "startup",
            Mode::BootOk => "bootok",
            Mode::AutoUpdate => "autoupdate",
            Mode::Recovery => "recovery",
            Mode::IncompatibleUpdate => "incompatible_update",
            Mode::FactoryInstall => "factory_install",
            Mode::FactoryFinal => "factory_final",
            Mode::ToDev => "todev",
            Mode::ToNormal => "tonormal",
            Mode::FastVersionCheck => "fast_version_check",
        }
    }

    /// Whether the compatibility gate runs before the handler.
    pub fn gate_first(self) -> bool {
        matches!(self, Mode::AutoUpdate | Mode::Recovery)
    }

    /// Whether the mode needs a firmware bundle at all.
    pub fn needs_bundle(self) -> bool {
        matches!(
            self,
            Mode::AutoUpdate
                | Mode::Recovery
                | Mode::IncompatibleUpdate
                | Mode::FactoryInstall
                | Mode::FastVersionCheck
        )
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "startup" => Ok(Mode::Startup),
            "bootok" => Ok(Mode::BootOk),
            "autoupdate" => Ok(Mode::AutoUpdate),
            "recovery" => Ok(Mode::Recovery),
            "incompatible_update" => Ok(Mode::IncompatibleUpdate),
            "factory_install" => Ok(Mode::FactoryInstall),
            "factory_final" => Ok(Mode::FactoryFinal),
            "todev" => Ok(Mode::ToDev),
            "tonormal" => Ok(Mode::ToNormal),
            "fast_version_check" => Ok(Mode::FastVersionCheck),
            other => Err(UpdateError::bad_input(format!("unknown mode {other:?}"))),
        }
    }
}

/// Everything a run needs, injected so that tests can swap in fakes.
#[derive(Clone, Copy)]
pub struct UpdateContext<'a> {
    pub store: &'a dyn PropertyStore,
    pub flash: &'a dyn FlashAccess,
    pub wp: &'a WpOracle<'a>,
    pub compat: &'a dyn CompatEnv,
    pub bundle: &'a Bundle,
    pub current: &'a CurrentVersions,
    pub targets: EnabledTargets,
    pub counts: TryCounts,
    pub dry_run: bool,
}

/// Run one mode to completion.
///
/// `Err(NeedsReboot)` is the armed-trial control signal, not a failure;
/// everything else aborts the run with its specific reason.
pub fn run(mode: Mode, ctx: &UpdateContext<'_>) -> UpdateResult<()> {
    log::info!("firmware update mode: {mode}");
    let (mode, main_rejection) = apply_gate(mode, ctx)?;

    // A declined main update excludes main from the run; the remaining
    // targets still get serviced before the rejection is reported.
    let mut ctx = *ctx;
    if main_rejection.is_some() {
        ctx.targets.main = false;
    }
    let ctx = &ctx;

    if mode == Mode::FastVersionCheck {
        return fast_version_check(ctx);
    }

    let plan = match mode {
        Mode::Startup => plan_startup(ctx)?,
        Mode::BootOk => plan_bootok(ctx)?,
        Mode::AutoUpdate => sequencer::plan_autoupdate(ctx)?,
        Mode::Recovery => sequencer::plan_recovery(ctx, false)?,
        Mode::IncompatibleUpdate => plan_incompatible_update(ctx)?,
        Mode::FactoryInstall => sequencer::plan_factory_install(ctx)?,
        Mode::FactoryFinal => plan_factory_final(),
        Mode::ToDev => plan_dev_toggle(true),
        Mode::ToNormal => plan_dev_toggle(false),
        Mode::FastVersionCheck => unreachable!("handled above"),
    };

    if plan.is_empty() && !plan.needs_reboot && main_rejection.is_none() {
        log::info!("{mode}: nothing to do");
        return Ok(());
    }

    plan.execute(ctx.flash, ctx.store, ctx.dry_run)?;

    if let Some(rejection) = main_rejection {
        return Err(rejection);
    }
    if plan.needs_reboot {
        return Err(UpdateError::NeedsReboot);
    }
    Ok(())
}

/// Run the compatibility gate for gated modes.
///
/// A rootkey mismatch always aborts. The recoverable needs-RO verdict
/// redirects to the RO-compatibility path when the bundle can actually
/// deliver one; otherwise main is excluded from the run and the rejection
/// comes back as the run's result once the other targets have been
/// serviced.
fn apply_gate(mode: Mode, ctx: &UpdateContext<'_>) -> UpdateResult<(Mode, Option<UpdateError>)> {
    if !mode.gate_first() {
        return Ok((mode, None));
    }
    let Some(img) = ctx.bundle.image(Target::Main) else {
        return Ok((mode, None));
    };
    if !ctx.targets.main {
        return Ok((mode, None));
    }

    match CompatChecker::new(ctx.compat).check()? {
        CompatVerdict::Compatible => Ok((mode, None)),
        CompatVerdict::NeedsRoUpdate { reason } => {
            if !img.has(Region::Ro) {
                // No RO payload to rebase onto: decline the main update.
                log::warn!("{reason}; declining (bundle carries no RO image)");
                Ok((mode, Some(UpdateError::RollbackRejected { reason })))
            } else if ctx.wp.is_write_protected(Target::Main) {
                log::warn!("{reason}");
                Ok((
                    mode,
                    Some(UpdateError::WriteProtected {
                        target: Target::Main,
                    }),
                ))
            } else {
                log::warn!("{reason}; switching to an RO-compatibility update");
                Ok((Mode::IncompatibleUpdate, None))
            }
        }
        CompatVerdict::Fatal { reason } => Err(UpdateError::FatalIncompatible { reason }),
    }
}

/// `startup` only services the software-sync reservation.
fn plan_startup(ctx: &UpdateContext<'_>) -> UpdateResult<UpdatePlan> {
    let mut plan = UpdatePlan::new();
    if let Some(tries) = ctx.store.get_u32(PropKey::UpdateTries)? {
        if tries > 0 {
            log::info!("software sync in progress; {} boot cycles left", tries - 1);
            plan.set_prop(PropKey::UpdateTries, (tries - 1).to_string());
        }
    }
    Ok(plan)
}

/// `bootok` confirms the trial the device just booted into.
fn plan_bootok(ctx: &UpdateContext<'_>) -> UpdateResult<UpdatePlan> {
    if !ctx.targets.main {
        return Ok(UpdatePlan::new());
    }
    let engine = AbEngine::from_store(ctx.store, ctx.counts)?;
    let slot_a = ctx.flash.read(Target::Main, Region::A)?;
    let slot_b = ctx.flash.read(Target::Main, Region::B)?;
    engine.plan_confirm(&slot_a, &slot_b)
}

/// The gate's fallback: recovery with RO updates forced on, ending in a
/// reboot when anything was written.
fn plan_incompatible_update(ctx: &UpdateContext<'_>) -> UpdateResult<UpdatePlan> {
    let mut plan = sequencer::plan_recovery(ctx, true)?;
    if !plan.writes.is_empty() {
        plan.needs_reboot = true;
    }
    Ok(plan)
}

fn plan_factory_final() -> UpdatePlan {
    let mut plan = UpdatePlan::new();
    plan.set_prop(PropKey::DevBootUsb, "0");
    plan.set_prop(PropKey::UpdateTries, "0");
    plan
}

fn plan_dev_toggle(enable: bool) -> UpdatePlan {
    let mut plan = UpdatePlan::new();
    plan.set_prop(PropKey::DevBootUsb, if enable { "1" } else { "0" });
    plan
}

/// Pure comparison of running versions against the bundle. No writes.
fn fast_version_check(ctx: &UpdateContext<'_>) -> UpdateResult<()> {
    let mut mismatches = Vec::new();
    for target in Target::ALL {
        if !ctx.targets.contains(target) {
            continue;
        }
        let Some(img) = ctx.bundle.image(target) else {
            continue;
        };
        match ctx.current.get(target) {
            Some(current) if current == img.version => {
                log::info!("{target}: {current} matches the bundle");
            }
            current => {
                mismatches.push(format!(
                    "{target}: running {}, bundle {}",
                    current.unwrap_or("<unknown>"),
                    img.version
                ));
            }
        }
    }
    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(UpdateError::VersionMismatch {
            reason: mismatches.join("; "),
        })
    }
}
