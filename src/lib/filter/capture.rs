//! The standard capture filter variant.
//!
//! Keeps fragments that overlap exactly one capture probe and carry at
//! least one reporter slice, then removes PCR duplicates. The surviving
//! table splits into capture slices (probe overlap) and reporter slices
//! (no probe overlap), which are paired per fragment for cis/trans
//! interaction reporting.

use ahash::AHashSet;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::CapFilterError;
use crate::fragment::{self, Fragment};
use crate::slice::{dot_i64, Slice, SliceTable};
use crate::stats::{CisTransStats, FragmentStats, CIS, TRANS};

use super::{FilterCore, FilterOp, FilterOptions, FilterStage, SliceFilter};

/// One capture/reporter slice pair from the same fragment, flattened for
/// TSV export. A fragment with several reporters yields one row per
/// reporter, all anchored on the fragment's capture slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedCaptureReporter {
    /// Parental read identifier shared by both slices.
    pub parent_read: String,
    /// Capture probe name.
    pub capture: String,
    /// Capture slice identifier.
    pub capture_slice_name: String,
    /// Capture slice chromosome.
    pub capture_chrom: String,
    /// Capture slice start.
    pub capture_start: u64,
    /// Capture slice end.
    pub capture_end: u64,
    /// Reporter slice identifier.
    pub reporter_slice_name: String,
    /// Reporter slice chromosome.
    pub reporter_chrom: String,
    /// Reporter slice start.
    pub reporter_start: u64,
    /// Reporter slice end.
    pub reporter_end: u64,
    /// Reporter restriction fragment, if assigned.
    #[serde(with = "dot_i64")]
    pub reporter_restriction_fragment: Option<i64>,
}

/// Standard capture filtering: one probe per fragment plus reporters.
pub struct CaptureFilter {
    core: FilterCore,
    n_adjacent: i64,
}

impl CaptureFilter {
    /// Creates the filter with the default stage configuration.
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
        Ok(Self { core: FilterCore::new(table, stages, options)?, n_adjacent: 1 })
    }

    /// Sets how many restriction fragments flanking each capture site are
    /// cleared of reporters (default 1).
    #[must_use]
    pub fn with_n_adjacent(mut self, n_adjacent: i64) -> Self {
        self.n_adjacent = n_adjacent;
        self
    }

    /// The default stage pipeline for standard capture experiments.
    #[must_use]
    pub fn default_stages() -> Vec<FilterStage> {
        vec![
            FilterStage::new("pre-filtering", vec![FilterOp::Raw]),
            FilterStage::new("mapped", vec![FilterOp::RemoveUnmapped]),
            FilterStage::new(
                "contains_single_capture",
                vec![FilterOp::RemoveOrphans, FilterOp::RemoveMultiCaptureFragments],
            ),
            FilterStage::new(
                "contains_capture_and_reporter",
                vec![
                    FilterOp::RemoveExcluded,
                    FilterOp::RemoveBlacklisted,
                    FilterOp::RemoveNonReporterFragments,
                    FilterOp::RemoveMultiCaptureAdjacentReporters,
                ],
            ),
            FilterStage::new(
                "duplicate_filtered",
                vec![
                    FilterOp::RemoveUnassignedReFragments,
                    FilterOp::RemoveDuplicateReFragments,
                    FilterOp::RemoveDuplicateFragments,
                    FilterOp::RemoveDuplicatePeFragments,
                    FilterOp::RemoveNonReporterFragments,
                ],
            ),
        ]
    }

    /// The fragment table derived from the current slices.
    #[must_use]
    pub fn fragments(&self) -> Vec<Fragment> {
        fragment::aggregate(self.core.table())
    }

    /// Slices overlapping a capture probe.
    #[must_use]
    pub fn captures(&self) -> Vec<&Slice> {
        self.core.table().slices().iter().filter(|s| s.is_capture()).collect()
    }

    /// Slices not overlapping any capture probe.
    #[must_use]
    pub fn reporters(&self) -> Vec<&Slice> {
        self.core.table().slices().iter().filter(|s| !s.is_capture()).collect()
    }

    /// Number of capture slices per probe, sorted by probe name.
    #[must_use]
    pub fn capture_site_counts(&self) -> Vec<(String, u64)> {
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for slice in self.core.table().slices() {
            if let Some(capture) = slice.capture.as_deref() {
                *counts.entry(capture).or_insert(0) += 1;
            }
        }
        counts.into_iter().map(|(site, count)| (site.to_string(), count)).collect()
    }

    /// Pairs every capture slice with every reporter slice of the same
    /// fragment. Fragments lacking either side contribute no rows.
    #[must_use]
    pub fn merged_captures_and_reporters(&self) -> Vec<MergedCaptureReporter> {
        let mut merged = Vec::new();
        for group in self.core.table().parent_groups() {
            let (captures, reporters): (Vec<&Slice>, Vec<&Slice>) =
                group.iter().partition(|s| s.is_capture());
            for capture in &captures {
                // is_capture guarantees the probe name is present
                let Some(probe) = capture.capture.as_deref() else { continue };
                for reporter in &reporters {
                    merged.push(MergedCaptureReporter {
                        parent_read: capture.parent_read.clone(),
                        capture: probe.to_string(),
                        capture_slice_name: capture.slice_name.clone(),
                        capture_chrom: capture.chrom.clone(),
                        capture_start: capture.start,
                        capture_end: capture.end,
                        reporter_slice_name: reporter.slice_name.clone(),
                        reporter_chrom: reporter.chrom.clone(),
                        reporter_start: reporter.start,
                        reporter_end: reporter.end,
                        reporter_restriction_fragment: reporter.restriction_fragment,
                    });
                }
            }
        }
        merged
    }

    /// Cis/trans interaction counts per capture probe, sorted by probe
    /// name with cis before trans. A reporter is cis when it shares the
    /// capture slice's chromosome. Only observed classes are reported.
    #[must_use]
    pub fn cis_or_trans_stats(&self) -> Vec<CisTransStats> {
        let merged = self.merged_captures_and_reporters();
        if merged.is_empty() {
            warn!("No capture/reporter pairs present; cis/trans statistics are empty");
            return Vec::new();
        }

        let mut counts: BTreeMap<(String, &'static str), u64> = BTreeMap::new();
        for pair in &merged {
            let class = if pair.capture_chrom == pair.reporter_chrom { CIS } else { TRANS };
            *counts.entry((pair.capture.clone(), class)).or_insert(0) += 1;
        }

        counts
            .into_iter()
            .map(|((capture, class), count)| CisTransStats {
                capture,
                cis_or_trans: class.to_string(),
                count,
                sample: self.core.sample_name().to_string(),
                read_type: self.core.read_type().to_string(),
            })
            .collect()
    }

    /// Fragment-level statistics for the current table.
    #[must_use]
    pub fn fragment_stats(&self) -> FragmentStats {
        FragmentStats::from_fragments(&self.fragments())
    }

    /// Removes fragments without any reporter slices. A capture-only
    /// fragment carries no interaction information.
    pub fn remove_non_reporter_fragments(&mut self) {
        let keep: AHashSet<String> = self
            .fragments()
            .into_iter()
            .filter(|f| f.reporter_count > 0)
            .map(|f| f.parent_read)
            .collect();
        self.core.retain_parent_reads(&keep);
    }

    /// Removes fragments overlapping more or fewer than one distinct
    /// capture probe. Double captures are common and uninterpretable.
    pub fn remove_multi_capture_fragments(&mut self) {
        let keep: AHashSet<String> = self
            .fragments()
            .into_iter()
            .filter(|f| f.unique_capture_sites == 1)
            .map(|f| f.parent_read)
            .collect();
        self.core.retain_parent_reads(&keep);
    }

    /// Removes reporters on restriction fragments adjacent to a capture
    /// site. A slice spanning the boundary between two nearby capture
    /// sites overlaps neither probe and would otherwise pass as a
    /// reporter:
    ///
    /// ```text
    /// ------Capture 1----/------Capture 2------
    ///                  -----REP--------
    /// ```
    ///
    /// `n_adjacent` controls how many flanking restriction fragments on
    /// each side are cleared. Capture slices themselves are never removed.
    pub fn remove_multicapture_adjacent_reporters(&mut self) {
        let capture_re_frags: AHashSet<i64> = self
            .core
            .table()
            .slices()
            .iter()
            .filter(|s| s.is_capture())
            .filter_map(|s| s.restriction_fragment)
            .collect();

        let n = self.n_adjacent;
        let excluded: AHashSet<i64> = capture_re_frags
            .iter()
            .flat_map(|frag| (-n..=n).map(move |offset| frag + offset))
            .collect();

        self.core.table.retain(|s| {
            s.capture_count > 0 || !s.restriction_fragment.is_some_and(|rf| excluded.contains(&rf))
        });
    }
}

impl SliceFilter for CaptureFilter {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn variant_name(&self) -> &'static str {
        "capture"
    }

    fn apply(&mut self, op: FilterOp) -> Result<(), CapFilterError> {
        if self.core.apply_shared(op) {
            return Ok(());
        }
        match op {
            FilterOp::RemoveNonReporterFragments => self.remove_non_reporter_fragments(),
            FilterOp::RemoveMultiCaptureFragments => self.remove_multi_capture_fragments(),
            FilterOp::RemoveMultiCaptureAdjacentReporters => {
                self.remove_multicapture_adjacent_reporters();
            }
            other => {
                return Err(CapFilterError::UnsupportedOperation {
                    operation: other.name(),
                    variant: self.variant_name(),
                })
            }
        }
        Ok(())
    }
}
