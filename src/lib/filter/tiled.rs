//! The tiled capture filter variant.
//!
//! Tiled experiments cover a whole region with overlapping probes, so the
//! capture/reporter split of the standard variant does not apply: most
//! slices overlap some probe and exclusion regions are not defined.
//! Fragments are kept when they touch exactly one capture region, and
//! cis/trans classification anchors each fragment on one designated
//! capture slice per region, treating the remaining slices as
//! pseudo-reporters.

use ahash::AHashSet;
use std::collections::BTreeMap;

use crate::errors::CapFilterError;
use crate::fragment::{self, TiledFragment};
use crate::slice::SliceTable;
use crate::stats::{CisTransStats, CIS, TRANS};

use super::{FilterCore, FilterOp, FilterOptions, FilterStage, SliceFilter};

/// Tiled capture filtering: one capture region per fragment, no exclusion.
pub struct TiledFilter {
    core: FilterCore,
}

impl TiledFilter {
    /// Creates the filter with the default tiled stage configuration.
    ///
    /// # Errors
    /// Never fails with the default stages; the error type is shared with
    /// [`with_stages`](Self::with_stages).
    pub fn new(table: SliceTable, options: &FilterOptions) -> Result<Self, CapFilterError> {
        Self::with_stages(table, Self::default_stages(), options)
    }

    /// Creates the filter with a custom stage configuration.
    ///
    /// # Errors
    /// Fails with [`CapFilterError::NoFilterStages`] if `stages` is empty.
    pub fn with_stages(
        table: SliceTable,
        stages: Vec<FilterStage>,
        options: &FilterOptions,
    ) -> Result<Self, CapFilterError> {
        Ok(Self { core: FilterCore::new(table, stages, options)? })
    }

    /// The default stage pipeline for tiled capture experiments.
    #[must_use]
    pub fn default_stages() -> Vec<FilterStage> {
        vec![
            FilterStage::new("pre-filtering", vec![FilterOp::Raw]),
            FilterStage::new("mapped", vec![FilterOp::RemoveUnmapped, FilterOp::RemoveOrphans]),
            FilterStage::new("not_blacklisted", vec![FilterOp::RemoveBlacklisted]),
            FilterStage::new(
                "contains_capture",
                vec![FilterOp::RemoveNonCaptureFragments, FilterOp::RemoveDualCaptureFragments],
            ),
            FilterStage::new(
                "duplicate_filtered",
                vec![
                    FilterOp::RemoveUnassignedReFragments,
                    FilterOp::RemoveDuplicateReFragments,
                    FilterOp::RemoveDuplicateFragments,
                    FilterOp::RemoveDuplicatePeFragments,
                ],
            ),
            // Duplicate removal can leave single-slice fragments behind.
            FilterStage::new("has_reporter", vec![FilterOp::RemoveOrphans]),
        ]
    }

    /// The fragment table derived from the current slices.
    #[must_use]
    pub fn fragments(&self) -> Vec<TiledFragment> {
        fragment::aggregate_tiled(self.core.table())
    }

    /// Cis/trans interaction counts per capture region, sorted by region
    /// name with cis before trans. Both classes are always reported, even
    /// when zero.
    ///
    /// Within each fragment touching a region, the first slice overlapping
    /// that region acts as the capture anchor; every other slice of the
    /// region plus every probe-free slice of the fragment counts as a
    /// pseudo-reporter, classified cis when it lies on the region's
    /// chromosome.
    #[must_use]
    pub fn cis_or_trans_stats(&self) -> Vec<CisTransStats> {
        // First slice observed for a region fixes the region's chromosome.
        let mut region_chroms: BTreeMap<&str, &str> = BTreeMap::new();
        for slice in self.core.table().slices() {
            if let Some(region) = slice.capture.as_deref() {
                region_chroms.entry(region).or_insert(slice.chrom.as_str());
            }
        }

        let mut rows = Vec::new();
        for (region, region_chrom) in region_chroms {
            let mut cis = 0u64;
            let mut trans = 0u64;
            for group in self.core.table().parent_groups() {
                if !group.iter().any(|s| s.capture.as_deref() == Some(region)) {
                    continue;
                }
                let mut anchor_seen = false;
                for slice in group {
                    let in_region = slice.capture.as_deref() == Some(region);
                    if in_region && !anchor_seen {
                        anchor_seen = true;
                        continue;
                    }
                    if in_region || !slice.is_capture() {
                        if slice.chrom == region_chrom {
                            cis += 1;
                        } else {
                            trans += 1;
                        }
                    }
                }
            }
            for (class, count) in [(CIS, cis), (TRANS, trans)] {
                rows.push(CisTransStats {
                    capture: region.to_string(),
                    cis_or_trans: class.to_string(),
                    count,
                    sample: self.core.sample_name().to_string(),
                    read_type: self.core.read_type().to_string(),
                });
            }
        }
        rows
    }

    /// Removes fragments without any capture probe overlap.
    pub fn remove_non_capture_fragments(&mut self) {
        let keep: AHashSet<String> = self
            .fragments()
            .into_iter()
            .filter(|f| f.capture_count > 0)
            .map(|f| f.parent_read)
            .collect();
        self.core.retain_parent_reads(&keep);
    }

    /// Removes fragments touching more than one distinct capture region.
    pub fn remove_dual_capture_fragments(&mut self) {
        let mut dual: AHashSet<String> = AHashSet::new();
        for group in self.core.table().parent_groups() {
            let regions: AHashSet<&str> = group.iter().filter_map(|s| s.capture.as_deref()).collect();
            if regions.len() > 1 {
                dual.insert(group[0].parent_read.clone());
            }
        }
        self.core.table.retain(|s| !dual.contains(&s.parent_read));
    }
}

impl SliceFilter for TiledFilter {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn variant_name(&self) -> &'static str {
        "tiled"
    }

    fn apply(&mut self, op: FilterOp) -> Result<(), CapFilterError> {
        match op {
            FilterOp::RemoveNonCaptureFragments => self.remove_non_capture_fragments(),
            FilterOp::RemoveDualCaptureFragments => self.remove_dual_capture_fragments(),
            // Exclusion regions and the capture/reporter split do not
            // exist in tiled experiments.
            FilterOp::RemoveExcluded
            | FilterOp::RemoveNonReporterFragments
            | FilterOp::RemoveMultiCaptureFragments
            | FilterOp::RemoveMultiCaptureAdjacentReporters
            | FilterOp::RemoveSingleReporterFragments => {
                return Err(CapFilterError::UnsupportedOperation {
                    operation: op.name(),
                    variant: self.variant_name(),
                })
            }
            shared => {
                let handled = self.core.apply_shared(shared);
                debug_assert!(handled, "{shared} must be a shared operation");
            }
        }
        Ok(())
    }
}
