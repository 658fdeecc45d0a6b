// Licensed under the Apache-2.0 license

//! Per-target update planning and EC/PD software-sync sequencing.

use vbfw_types::{Region, Target};

use crate::ab::AbEngine;
use crate::bundle::TargetImage;
use crate::dispatch::UpdateContext;
use crate::error::{UpdateError, UpdateResult};
use crate::plan::UpdatePlan;
use crate::props::{PropKey, PropertyStore};

fn version_current(ctx: &UpdateContext, target: Target, img: &TargetImage) -> bool {
    ctx.current.get(target) == Some(img.version.as_str())
}

/// EC/PD targets whose bundled version differs from what is running.
fn sync_targets<'b>(ctx: &'b UpdateContext) -> Vec<(Target, &'b TargetImage)> {
    [Target::Ec, Target::Pd]
        .into_iter()
        .filter(|t| ctx.targets.contains(*t))
        .filter_map(|t| ctx.bundle.image(t).map(|img| (t, img)))
        .filter(|(t, img)| !version_current(ctx, *t, img))
        .collect()
}

/// The `autoupdate` pass: Main through the A/B engine, EC/PD either updated
/// in place or deferred behind the Main trial.
pub(crate) fn plan_autoupdate(ctx: &UpdateContext) -> UpdateResult<UpdatePlan> {
    if let Some(boot_type) = ctx.store.get(PropKey::MainBootType)? {
        if boot_type.trim() == "recovery" {
            return Err(UpdateError::bad_input(
                "autoupdate is not available while booted from recovery firmware; \
                 use the recovery mode instead",
            ));
        }
    }

    let mut plan = UpdatePlan::new();
    let pending = sync_targets(ctx);

    let mut main_trial_armed = false;
    if ctx.targets.main {
        if let Some(img) = ctx.bundle.image(Target::Main) {
            if version_current(ctx, Target::Main, img) {
                log::info!("main firmware already at {}", img.version);
            } else {
                let engine = AbEngine::from_store(ctx.store, ctx.counts)?;
                let slot_a = ctx.flash.read(Target::Main, Region::A)?;
                let slot_b = ctx.flash.read(Target::Main, Region::B)?;
                let target_rw = img.require(Region::A)?;
                let main_plan =
                    engine.plan_update(&slot_a, &slot_b, target_rw, !pending.is_empty())?;
                main_trial_armed = main_plan.needs_reboot;
                plan.merge(main_plan);
            }
        }
    }

    let mut deferred = false;
    for (target, img) in pending {
        if main_trial_armed {
            // Never stack an untested EC/PD change on an untested Main
            // trial; the reserved boot cycles cover the follow-up pass.
            log::info!("deferring {target} update until the main trial is confirmed");
            deferred = true;
        } else {
            plan.merge(plan_rorw_update(ctx, target, img)?);
        }
    }
    if deferred {
        plan.set_prop(PropKey::UpdateTries, ctx.counts.with_sync.to_string());
    }

    Ok(plan)
}

/// Incremental update of an RO+RW target. RO rides along only while the
/// chip is still unprotected; a protected RO is permanent and the RW
/// section is the entire field-updatable surface.
pub(crate) fn plan_rorw_update(
    ctx: &UpdateContext,
    target: Target,
    img: &TargetImage,
) -> UpdateResult<UpdatePlan> {
    let Some(rw_region) = target.rw_region() else {
        return Err(UpdateError::bad_input(format!(
            "{target} firmware has no single RW region"
        )));
    };
    let ro_region = target.ro_region();
    let mut plan = UpdatePlan::new();

    if !ctx.wp.is_write_protected(target) && img.has(ro_region) {
        for region in [ro_region, rw_region] {
            if let Some(data) = img.region(region) {
                if ctx.flash.read(target, region)? != data {
                    plan.push_write(target, region, data.to_vec());
                }
            }
        }
    } else {
        if img.has(ro_region) {
            log::debug!("{target} RO is write-protected; updating RW only");
        }
        let data = img.require(rw_region)?;
        if ctx.flash.read(target, rw_region)? != data {
            plan.push_write(target, rw_region, data.to_vec());
        }
    }
    Ok(plan)
}

/// The `recovery` pass: rewrite everything the bundle offers that write
/// protection permits. With `force_ro` the Main RO section must be
/// writable, or the run stops with the dedicated write-protect error.
pub(crate) fn plan_recovery(ctx: &UpdateContext, force_ro: bool) -> UpdateResult<UpdatePlan> {
    let mut plan = UpdatePlan::new();

    if ctx.targets.main {
        if let Some(img) = ctx.bundle.image(Target::Main) {
            let protected = ctx.wp.is_write_protected(Target::Main);
            if force_ro {
                if protected {
                    return Err(UpdateError::WriteProtected {
                        target: Target::Main,
                    });
                }
                if !img.has(Region::Ro) {
                    return Err(UpdateError::bad_input(
                        "bundle carries no RO image for an RO-compatibility update",
                    ));
                }
            }

            let ro_allowed = !protected;
            if ro_allowed && img.has(Region::Ro) {
                plan.push_write(Target::Main, Region::Ro, img.require(Region::Ro)?.to_vec());
            }
            let rw_payload = img.require(Region::A)?;
            plan.push_write(Target::Main, Region::A, rw_payload.to_vec());
            plan.push_write(Target::Main, Region::B, rw_payload.to_vec());
            if img.has(Region::Shared) {
                plan.push_write(
                    Target::Main,
                    Region::Shared,
                    img.require(Region::Shared)?.to_vec(),
                );
            }
            if ro_allowed && img.has(Region::Legacy) {
                plan.push_write(
                    Target::Main,
                    Region::Legacy,
                    img.require(Region::Legacy)?.to_vec(),
                );
            }

            // Both slots were just replaced; no trial survives this.
            let engine = AbEngine::from_store(ctx.store, ctx.counts)?;
            engine.reset_trial_state(&mut plan, false);
        }
    }

    for target in [Target::Ec, Target::Pd] {
        if !ctx.targets.contains(target) {
            continue;
        }
        let Some(img) = ctx.bundle.image(target) else {
            continue;
        };
        let ro = target.ro_region();
        if !ctx.wp.is_write_protected(target) && img.has(ro) {
            plan.push_write(target, ro, img.require(ro)?.to_vec());
        }
        if let Some(rw) = target.rw_region() {
            if img.has(rw) {
                plan.push_write(target, rw, img.require(rw)?.to_vec());
            }
        }
    }

    Ok(plan)
}

/// The `factory_install` pass: write protection must be fully disabled on
/// every enabled target, everything in the bundle is written, and volatile
/// control state is cleared.
pub(crate) fn plan_factory_install(ctx: &UpdateContext) -> UpdateResult<UpdatePlan> {
    for target in Target::ALL {
        if !ctx.targets.contains(target) || ctx.bundle.image(target).is_none() {
            continue;
        }
        if ctx.wp.is_write_protected(target) {
            return Err(UpdateError::WriteProtected { target });
        }
    }

    let mut plan = UpdatePlan::new();
    for target in Target::ALL {
        if !ctx.targets.contains(target) {
            continue;
        }
        let Some(img) = ctx.bundle.image(target) else {
            continue;
        };
        for (region, data) in img.regions() {
            plan.push_write(target, region, data.to_vec());
            if region == Region::A {
                plan.push_write(target, Region::B, data.to_vec());
            }
        }
    }

    let engine = AbEngine::from_store(ctx.store, ctx.counts)?;
    engine.reset_trial_state(&mut plan, false);
    plan.set_prop(PropKey::UpdateTries, "0");
    Ok(plan)
}
