//! The triplet capture filter variant.
//!
//! Identical to standard capture filtering except that fragments must hold
//! at least two reporter slices, so every surviving fragment describes a
//! three-way (or higher) contact. Exclusion regions are not used; the
//! default stages drop the exclusion step and append a terminal reporter
//! multiplicity stage.

use ahash::AHashSet;

use crate::errors::CapFilterError;
use crate::fragment::Fragment;
use crate::slice::SliceTable;
use crate::stats::{CisTransStats, FragmentStats};

use super::capture::{CaptureFilter, MergedCaptureReporter};
use super::{FilterCore, FilterOp, FilterOptions, FilterStage, SliceFilter};

/// Triplet capture filtering: standard capture plus a minimum of two
/// reporters per fragment.
pub struct TripletFilter {
    inner: CaptureFilter,
}

impl TripletFilter {
    /// Creates the filter with the default triplet stage configuration.
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
        Ok(Self { inner: CaptureFilter::with_stages(table, stages, options)? })
    }

    /// The default stage pipeline for triplet capture experiments.
    #[must_use]
    pub fn default_stages() -> Vec<FilterStage> {
        vec![
            FilterStage::new("pre-filtering", vec![FilterOp::Raw]),
            FilterStage::new(
                "mapped",
                vec![FilterOp::RemoveUnmapped, FilterOp::RemoveUnassignedReFragments],
            ),
            FilterStage::new(
                "contains_single_capture",
                vec![FilterOp::RemoveOrphans, FilterOp::RemoveMultiCaptureFragments],
            ),
            FilterStage::new(
                "contains_capture_and_reporter",
                vec![FilterOp::RemoveBlacklisted, FilterOp::RemoveNonReporterFragments],
            ),
            FilterStage::new(
                "duplicate_filtered",
                vec![
                    FilterOp::RemoveDuplicateReFragments,
                    FilterOp::RemoveDuplicateFragments,
                    FilterOp::RemoveDuplicatePeFragments,
                    FilterOp::RemoveNonReporterFragments,
                ],
            ),
            FilterStage::new("triplet_reporter", vec![FilterOp::RemoveSingleReporterFragments]),
        ]
    }

    /// The fragment table derived from the current slices.
    #[must_use]
    pub fn fragments(&self) -> Vec<Fragment> {
        self.inner.fragments()
    }

    /// Pairs every capture slice with every reporter slice per fragment.
    #[must_use]
    pub fn merged_captures_and_reporters(&self) -> Vec<MergedCaptureReporter> {
        self.inner.merged_captures_and_reporters()
    }

    /// Cis/trans interaction counts per capture probe.
    #[must_use]
    pub fn cis_or_trans_stats(&self) -> Vec<CisTransStats> {
        self.inner.cis_or_trans_stats()
    }

    /// Fragment-level statistics for the current table.
    #[must_use]
    pub fn fragment_stats(&self) -> FragmentStats {
        self.inner.fragment_stats()
    }

    /// Removes fragments with fewer than two reporter slices. A single
    /// reporter cannot describe a multi-way contact.
    pub fn remove_single_reporter_fragments(&mut self) {
        let keep: AHashSet<String> = self
            .fragments()
            .into_iter()
            .filter(|f| f.reporter_count > 1)
            .map(|f| f.parent_read)
            .collect();
        self.core_mut().retain_parent_reads(&keep);
    }
}

impl SliceFilter for TripletFilter {
    fn core(&self) -> &FilterCore {
        self.inner.core()
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        self.inner.core_mut()
    }

    fn variant_name(&self) -> &'static str {
        "triplet"
    }

    fn apply(&mut self, op: FilterOp) -> Result<(), CapFilterError> {
        match op {
            FilterOp::RemoveSingleReporterFragments => {
                self.remove_single_reporter_fragments();
                Ok(())
            }
            other => self.inner.apply(other).map_err(|err| match err {
                CapFilterError::UnsupportedOperation { operation, .. } => {
                    CapFilterError::UnsupportedOperation { operation, variant: "triplet" }
                }
                err => err,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SnapshotMode;
    use crate::slice::Slice;
    use crate::testutil::{capture_slice, reporter_slice};
    use std::path::Path;

    fn filter_with(slices: Vec<Slice>) -> TripletFilter {
        let options = FilterOptions {
            sample_name: "dox_1".to_string(),
            read_type: "flashed".to_string(),
            seed: Some(7),
        };
        TripletFilter::new(SliceTable::new(slices), &options).unwrap()
    }

    fn surviving_parents(filter: &TripletFilter) -> Vec<&str> {
        filter.core().table().parent_groups().map(|g| g[0].parent_read.as_str()).collect()
    }

    #[test]
    fn test_single_reporter_fragments_removed() {
        let mut filter = filter_with(vec![
            capture_slice("read_a", 0, "probe_a", 100),
            reporter_slice("read_a", 1, 110),
            capture_slice("read_b", 0, "probe_a", 100),
            reporter_slice("read_b", 1, 120),
            reporter_slice("read_b", 2, 130),
        ]);
        filter.remove_single_reporter_fragments();
        assert_eq!(surviving_parents(&filter), vec!["read_b"]);
    }

    #[test]
    fn test_default_pipeline_requires_two_reporters() {
        let mut filter = filter_with(vec![
            capture_slice("read_a", 0, "probe_a", 100),
            reporter_slice("read_a", 1, 110),
            capture_slice("read_b", 2, "probe_a", 100),
            reporter_slice("read_b", 3, 120),
            reporter_slice("read_b", 4, 130),
        ]);
        filter.filter_slices(SnapshotMode::None, Path::new(".")).unwrap();

        assert_eq!(surviving_parents(&filter), vec!["read_b"]);
        let fragments = filter.fragments();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].reporter_count, 2);
    }

    #[test]
    fn test_stage_order_ends_with_triplet_reporter() {
        let mut filter = filter_with(vec![
            capture_slice("read_a", 0, "probe_a", 100),
            reporter_slice("read_a", 1, 110),
            reporter_slice("read_a", 2, 120),
        ]);
        filter.filter_slices(SnapshotMode::None, Path::new(".")).unwrap();

        let stats = filter.filter_stats();
        let stages: Vec<&str> = stats.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(
            stages,
            vec![
                "pre-filtering",
                "mapped",
                "contains_single_capture",
                "contains_capture_and_reporter",
                "duplicate_filtered",
                "triplet_reporter"
            ]
        );
        assert_eq!(stats.last().unwrap().unique_fragments, 1);
    }

    #[test]
    fn test_excluded_slices_are_not_removed() {
        // Triplet filtering ignores exclusion annotations entirely.
        let mut excluded = reporter_slice("read_a", 1, 110);
        excluded.exclusion = Some("probe_a".to_string());
        excluded.exclusion_count = 1;

        let mut filter = filter_with(vec![
            capture_slice("read_a", 0, "probe_a", 100),
            excluded,
            reporter_slice("read_a", 2, 120),
            reporter_slice("read_a", 3, 130),
        ]);
        filter.filter_slices(SnapshotMode::None, Path::new(".")).unwrap();
        assert_eq!(filter.core().table().len(), 4);
    }

    #[test]
    fn test_tiled_only_operation_rejected_as_triplet() {
        let mut filter = filter_with(vec![capture_slice("read_a", 0, "probe_a", 100)]);
        let err = filter.apply(FilterOp::RemoveNonCaptureFragments).unwrap_err();
        assert!(matches!(
            err,
            CapFilterError::UnsupportedOperation { variant: "triplet", .. }
        ));
    }
}
