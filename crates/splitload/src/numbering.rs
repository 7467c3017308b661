//! Fragment numbering derived from split-point ids.
//!
//! Split point `0` is the program's initial entry. Split points `1..num_entries`
//! can be injected at run time. Fragment numbers live in their own namespace:
//!
//! ```text
//! 0                           initial fragment
//! 1 .. num_entries            exclusive fragment of split point `sp` (== sp)
//! num_entries + 2(sp - 1)     base fragment of split point `sp`
//! num_entries + 2(sp - 1) + 1 leftovers fragment when `sp` is the base
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use splitload_contracts::NUMBERING_REPORT_SCHEMA_VERSION;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SplitPointId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentNumber(pub u32);

impl fmt::Display for SplitPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FragmentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SplitPointId {
    fn from(v: u32) -> Self {
        SplitPointId(v)
    }
}

impl From<u32> for FragmentNumber {
    fn from(v: u32) -> Self {
        FragmentNumber(v)
    }
}

/// What a fragment number holds, relative to a given `num_entries`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FragmentKind {
    Initial,
    Exclusive { split_point: SplitPointId },
    Base { split_point: SplitPointId },
    Leftovers { base: SplitPointId },
}

impl FragmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FragmentKind::Initial => "initial",
            FragmentKind::Exclusive { .. } => "exclusive",
            FragmentKind::Base { .. } => "base",
            FragmentKind::Leftovers { .. } => "leftovers",
        }
    }
}

/// Largest `num_entries` whose fragment numbers all fit in a `u32`.
///
/// At this bound `fragment_count` is `u32::MAX - 2`.
pub const MAX_NUM_ENTRIES: u32 = (u32::MAX - 1) / 3 + 1;

// `sp` must be >= 1 and `num_entries <= MAX_NUM_ENTRIES`; callers validate against
// `is_split_point` and `FragmentManifest::validate` first.
pub fn base_fragment_number(num_entries: u32, sp: SplitPointId) -> FragmentNumber {
    FragmentNumber(num_entries + 2 * (sp.0 - 1))
}

pub fn leftovers_fragment_number(num_entries: u32, base: SplitPointId) -> FragmentNumber {
    FragmentNumber(num_entries + 2 * (base.0 - 1) + 1)
}

pub fn exclusive_fragment_number(sp: SplitPointId) -> FragmentNumber {
    FragmentNumber(sp.0)
}

pub fn is_split_point(num_entries: u32, sp: SplitPointId) -> bool {
    sp.0 >= 1 && sp.0 < num_entries
}

pub fn split_points(num_entries: u32) -> impl Iterator<Item = SplitPointId> {
    (1..num_entries).map(SplitPointId)
}

/// Saturates at `u32::MAX` when `num_entries > MAX_NUM_ENTRIES`.
pub fn fragment_count(num_entries: u32) -> u32 {
    u32::try_from(wide_fragment_count(num_entries)).unwrap_or(u32::MAX)
}

fn wide_fragment_count(num_entries: u32) -> u64 {
    1 + 3 * u64::from(num_entries.saturating_sub(1))
}

pub fn classify(num_entries: u32, fragment: FragmentNumber) -> Option<FragmentKind> {
    let f = fragment.0;
    if u64::from(f) >= wide_fragment_count(num_entries) {
        return None;
    }
    if f == 0 {
        return Some(FragmentKind::Initial);
    }
    if f < num_entries {
        return Some(FragmentKind::Exclusive {
            split_point: SplitPointId(f),
        });
    }
    let offset = f - num_entries;
    let sp = SplitPointId(offset / 2 + 1);
    if offset % 2 == 0 {
        Some(FragmentKind::Base { split_point: sp })
    } else {
        Some(FragmentKind::Leftovers { base: sp })
    }
}

/// Numbering bound to one build's `num_entries`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Numbering {
    num_entries: u32,
}

impl Numbering {
    pub fn new(num_entries: u32) -> Self {
        Self { num_entries }
    }

    pub fn num_entries(self) -> u32 {
        self.num_entries
    }

    pub fn base_fragment(self, sp: SplitPointId) -> FragmentNumber {
        base_fragment_number(self.num_entries, sp)
    }

    pub fn leftovers_fragment(self, base: SplitPointId) -> FragmentNumber {
        leftovers_fragment_number(self.num_entries, base)
    }

    pub fn exclusive_fragment(self, sp: SplitPointId) -> FragmentNumber {
        exclusive_fragment_number(sp)
    }

    pub fn contains(self, sp: SplitPointId) -> bool {
        is_split_point(self.num_entries, sp)
    }

    pub fn split_points(self) -> impl Iterator<Item = SplitPointId> {
        split_points(self.num_entries)
    }

    pub fn fragment_count(self) -> u32 {
        fragment_count(self.num_entries)
    }

    pub fn classify(self, fragment: FragmentNumber) -> Option<FragmentKind> {
        classify(self.num_entries, fragment)
    }

    pub fn table(self, module_name: &str) -> NumberingTable {
        let rows = self
            .split_points()
            .map(|sp| NumberingRow {
                split_point: sp,
                exclusive: self.exclusive_fragment(sp),
                base: self.base_fragment(sp),
                leftovers_if_base: self.leftovers_fragment(sp),
            })
            .collect();
        NumberingTable {
            schema_version: NUMBERING_REPORT_SCHEMA_VERSION.to_string(),
            module_name: module_name.to_string(),
            num_entries: self.num_entries,
            fragment_count: self.fragment_count(),
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingRow {
    pub split_point: SplitPointId,
    pub exclusive: FragmentNumber,
    pub base: FragmentNumber,
    pub leftovers_if_base: FragmentNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingTable {
    pub schema_version: String,
    pub module_name: String,
    pub num_entries: u32,
    pub fragment_count: u32,
    pub rows: Vec<NumberingRow>,
}
