//! Fragment-level aggregation of the slice table.
//!
//! A fragment is the parental read: one row per distinct `parent_read`,
//! summarising the slices that currently survive filtering. Fragments are
//! derived views with no lifecycle of their own; they are recomputed from
//! scratch on every request because the owning table shrinks between
//! accesses and a cached aggregate would go stale.

use ahash::AHashSet;
use serde::Serialize;

use crate::slice::{ReadPairStatus, Slice, SliceTable};

/// One parental read aggregated from its surviving slices.
///
/// Used by the standard-capture and triplet-capture variants. `coordinates`
/// is the `|`-joined concatenation of each slice's coordinates in table
/// order (5'→3'), which doubles as the PCR-duplicate key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fragment {
    /// Parental read identifier.
    pub parent_read: String,
    /// Number of distinct slice indices in the fragment.
    pub unique_slices: u32,
    /// Combined-read status, taken from the first slice.
    pub pe: ReadPairStatus,
    /// Number of mapped slices.
    pub mapped: u32,
    /// Number of multimapped slices.
    pub multimapped: u32,
    /// Number of distinct capture probes overlapped by the fragment.
    pub unique_capture_sites: u32,
    /// Total capture probe overlaps across slices.
    pub capture_count: u32,
    /// Number of distinct exclusion regions overlapped by the fragment.
    pub unique_exclusion_sites: u32,
    /// Total exclusion region overlaps across slices.
    pub exclusion_count: u32,
    /// Number of distinct restriction fragments touched.
    pub unique_restriction_fragments: u32,
    /// Number of blacklisted slice overlaps.
    pub blacklisted_slices: u32,
    /// Order-preserving `|`-joined slice coordinates.
    pub coordinates: String,
    /// Reporter slices in this fragment. Slices only count as reporters
    /// when the fragment contains at least one capture slice:
    /// `mapped - (exclusion_count + capture_count + blacklisted_slices)`,
    /// otherwise 0. May be negative when annotations overlap.
    pub reporter_count: i64,
}

impl Fragment {
    /// Aggregates one run of slices sharing a `parent_read`.
    ///
    /// The run must be non-empty and in table order.
    #[must_use]
    pub fn from_group(group: &[Slice]) -> Self {
        let first = &group[0];

        let unique_slices = group.iter().map(|s| s.slice).collect::<AHashSet<_>>().len() as u32;
        let unique_capture_sites = unique_present(group.iter().map(|s| s.capture.as_deref()));
        let unique_exclusion_sites = unique_present(group.iter().map(|s| s.exclusion.as_deref()));
        let unique_restriction_fragments =
            group.iter().filter_map(|s| s.restriction_fragment).collect::<AHashSet<_>>().len()
                as u32;

        let mapped: u32 = group.iter().map(|s| u32::from(s.mapped)).sum();
        let multimapped: u32 = group.iter().map(|s| u32::from(s.multimapped)).sum();
        let capture_count: u32 = group.iter().map(|s| s.capture_count).sum();
        let exclusion_count: u32 = group.iter().map(|s| s.exclusion_count).sum();
        let blacklisted_slices: u32 = group.iter().map(|s| s.blacklist).sum();

        let reporter_count = if capture_count > 0 {
            i64::from(mapped) - i64::from(exclusion_count + capture_count + blacklisted_slices)
        } else {
            0
        };

        Self {
            parent_read: first.parent_read.clone(),
            unique_slices,
            pe: first.pe,
            mapped,
            multimapped,
            unique_capture_sites,
            capture_count,
            unique_exclusion_sites,
            exclusion_count,
            unique_restriction_fragments,
            blacklisted_slices,
            coordinates: joined_coordinates(group),
            reporter_count,
        }
    }
}

/// One parental read aggregated for the tiled-capture variant.
///
/// Tiled capture has no exclusion concept, so the exclusion columns are
/// omitted entirely, and reporter/capture roles are not separable by locus,
/// so no reporter count is derived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TiledFragment {
    /// Parental read identifier.
    pub parent_read: String,
    /// Number of distinct slice indices in the fragment.
    pub unique_slices: u32,
    /// Combined-read status, taken from the first slice.
    pub pe: ReadPairStatus,
    /// Number of mapped slices.
    pub mapped: u32,
    /// Number of multimapped slices.
    pub multimapped: u32,
    /// Total capture probe overlaps across slices.
    pub capture_count: u32,
    /// Number of distinct restriction fragments touched.
    pub unique_restriction_fragments: u32,
    /// Number of blacklisted slice overlaps.
    pub blacklisted_slices: u32,
    /// Order-preserving `|`-joined slice coordinates.
    pub coordinates: String,
}

impl TiledFragment {
    /// Aggregates one run of slices sharing a `parent_read`.
    #[must_use]
    pub fn from_group(group: &[Slice]) -> Self {
        let first = &group[0];
        Self {
            parent_read: first.parent_read.clone(),
            unique_slices: group.iter().map(|s| s.slice).collect::<AHashSet<_>>().len() as u32,
            pe: first.pe,
            mapped: group.iter().map(|s| u32::from(s.mapped)).sum(),
            multimapped: group.iter().map(|s| u32::from(s.multimapped)).sum(),
            capture_count: group.iter().map(|s| s.capture_count).sum(),
            unique_restriction_fragments: group
                .iter()
                .filter_map(|s| s.restriction_fragment)
                .collect::<AHashSet<_>>()
                .len() as u32,
            blacklisted_slices: group.iter().map(|s| s.blacklist).sum(),
            coordinates: joined_coordinates(group),
        }
    }
}

/// Derives the fragment table for the standard/triplet variants.
#[must_use]
pub fn aggregate(table: &SliceTable) -> Vec<Fragment> {
    table.parent_groups().map(Fragment::from_group).collect()
}

/// Derives the fragment table for the tiled variant.
#[must_use]
pub fn aggregate_tiled(table: &SliceTable) -> Vec<TiledFragment> {
    table.parent_groups().map(TiledFragment::from_group).collect()
}

/// Count of distinct present annotation values in a group.
fn unique_present<'a>(values: impl Iterator<Item = Option<&'a str>>) -> u32 {
    values.flatten().collect::<AHashSet<_>>().len() as u32
}

fn joined_coordinates(group: &[Slice]) -> String {
    group.iter().map(|s| s.coordinates.as_str()).collect::<Vec<_>>().join("|")
}
