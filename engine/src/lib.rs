// Licensed under the Apache-2.0 license

//! The firmware update decision engine.
//!
//! Everything here reasons about state and produces an [`UpdatePlan`]; the
//! actual flash traffic, key handling and property persistence live behind
//! the injected traits so that the decision logic runs unchanged against a
//! real device or the in-memory fakes in [`testing`].

mod ab;
mod bundle;
mod dispatch;
mod error;
mod flash;
mod plan;
mod props;
mod sequencer;
pub mod testing;
mod wp;

pub use ab::{AbEngine, TrialVariant, TryCounts};
pub use bundle::{Bundle, CurrentVersions, EnabledTargets, TargetImage};
pub use dispatch::{run, Mode, UpdateContext};
pub use error::{UpdateError, UpdateResult};
pub use flash::FlashAccess;
pub use plan::{UpdatePlan, WriteOp};
pub use props::{PropKey, PropertyStore, PropertyStoreExt};
pub use wp::{WpOracle, WpOverride, WpQuery};
