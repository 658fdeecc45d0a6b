// Licensed under the Apache-2.0 license

use core::fmt;
use core::str::FromStr;

/// A firmware chip the updater can service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Target {
    /// AP/BIOS firmware, carries the A/B slot pair.
    Main,
    /// Embedded controller, RO+RW only.
    Ec,
    /// Power-delivery controller, RO+RW only.
    Pd,
}

/// How a target's writable flash is laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutKind {
    /// Redundant RW slots with trial-and-rollback support.
    AbCapable,
    /// A single RW section next to a (usually protected) RO section.
    RoRw,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Main, Target::Ec, Target::Pd];

    pub fn name(self) -> &'static str {
        match self {
            Target::Main => "main",
            Target::Ec => "ec",
            Target::Pd => "pd",
        }
    }

    pub fn layout(self) -> LayoutKind {
        match self {
            Target::Main => LayoutKind::AbCapable,
            Target::Ec | Target::Pd => LayoutKind::RoRw,
        }
    }

    /// The region holding the target's read-only section.
    pub fn ro_region(self) -> Region {
        match self {
            Target::Main => Region::Ro,
            Target::Ec => Region::EcRo,
            Target::Pd => Region::PdRo,
        }
    }

    /// The single RW region of an RO+RW target.
    ///
    /// Main has no single RW region; its writable flash is the A/B pair.
    pub fn rw_region(self) -> Option<Region> {
        match self {
            Target::Main => None,
            Target::Ec => Some(Region::EcRw),
            Target::Pd => Some(Region::PdRw),
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Target::Main => 0,
            Target::Ec => 1,
            Target::Pd => 2,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named flash region. The names are the vocabulary shared with the
/// flashing tool's layout map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Region {
    Ro,
    A,
    B,
    Shared,
    Legacy,
    EcRo,
    EcRw,
    PdRo,
    PdRw,
}

impl Region {
    pub fn name(self) -> &'static str {
        match self {
            Region::Ro => "RO",
            Region::A => "A",
            Region::B => "B",
            Region::Shared => "SHARED",
            Region::Legacy => "LEGACY",
            Region::EcRo => "EC_RO",
            Region::EcRw => "EC_RW",
            Region::PdRo => "PD_RO",
            Region::PdRw => "PD_RW",
        }
    }

    /// The target whose flash chip hosts this region.
    pub fn target(self) -> Target {
        match self {
            Region::Ro | Region::A | Region::B | Region::Shared | Region::Legacy => Target::Main,
            Region::EcRo | Region::EcRw => Target::Ec,
            Region::PdRo | Region::PdRw => Target::Pd,
        }
    }

    /// Whether writing this region requires the RO section to be unprotected.
    pub fn is_read_only_section(self) -> bool {
        matches!(self, Region::Ro | Region::EcRo | Region::PdRo)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RO" => Ok(Region::Ro),
            "A" => Ok(Region::A),
            "B" => Ok(Region::B),
            "SHARED" => Ok(Region::Shared),
            "LEGACY" => Ok(Region::Legacy),
            "EC_RO" => Ok(Region::EcRo),
            "EC_RW" => Ok(Region::EcRw),
            "PD_RO" => Ok(Region::PdRo),
            "PD_RW" => Ok(Region::PdRw),
            other => Err(format!("unknown flash region {other:?}")),
        }
    }
}

/// One of the two redundant Main RW slots. A is always index 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MainSlot {
    A,
    B,
}

impl MainSlot {
    pub fn other(self) -> MainSlot {
        match self {
            MainSlot::A => MainSlot::B,
            MainSlot::B => MainSlot::A,
        }
    }

    pub fn region(self) -> Region {
        match self {
            MainSlot::A => Region::A,
            MainSlot::B => Region::B,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MainSlot::A => "A",
            MainSlot::B => "B",
        }
    }
}

impl fmt::Display for MainSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MainSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" | "a" => Ok(MainSlot::A),
            "B" | "b" => Ok(MainSlot::B),
            other => Err(format!("not a main firmware slot: {other:?}")),
        }
    }
}

/// Per-target cache slot for boot-time state derived once per run.
#[derive(Default)]
pub struct PerTarget<T>([Option<T>; 3]);

impl<T: Copy> PerTarget<T> {
    pub fn get(&self, target: Target) -> Option<T> {
        self.0[target.index()]
    }

    pub fn set(&mut self, target: Target, value: T) {
        self.0[target.index()] = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_names_match_layout_vocabulary() {
        assert_eq!(Region::Ro.name(), "RO");
        assert_eq!(Region::Shared.name(), "SHARED");
        assert_eq!(Region::EcRw.name(), "EC_RW");
        assert_eq!(Region::PdRo.name(), "PD_RO");
        assert_eq!("LEGACY".parse::<Region>().unwrap(), Region::Legacy);
        assert!("RW_SECTION_A".parse::<Region>().is_err());
    }

    #[test]
    fn slot_pairing() {
        assert_eq!(MainSlot::A.other(), MainSlot::B);
        assert_eq!(MainSlot::B.other(), MainSlot::A);
        assert_eq!(MainSlot::B.region(), Region::B);
        assert_eq!("B".parse::<MainSlot>().unwrap(), MainSlot::B);
        assert!("recovery".parse::<MainSlot>().is_err());
    }

    #[test]
    fn ro_regions_per_target() {
        assert_eq!(Target::Main.ro_region(), Region::Ro);
        assert_eq!(Target::Ec.ro_region(), Region::EcRo);
        assert_eq!(Target::Main.rw_region(), None);
        assert_eq!(Target::Pd.rw_region(), Some(Region::PdRw));
    }
}
