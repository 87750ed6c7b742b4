//! The multi-stage slice-filtering engine.
//!
//! A filter variant owns a [`SliceTable`] and a declared list of
//! [`FilterStage`]s, each an ordered list of [`FilterOp`]s. Running the
//! pipeline applies every operation in declaration order, replacing the
//! table with a row subset at each step, and snapshots slice-level
//! statistics once per completed stage.
//!
//! Three variants share this executor:
//!
//! - [`capture::CaptureFilter`] - standard capture, exactly one capture
//!   probe per fragment plus one or more reporters,
//! - [`triplet::TripletFilter`] - the standard variant with a terminal
//!   stage requiring at least two reporters per fragment,
//! - [`tiled::TiledFilter`] - tiled capture, where many overlapping probes
//!   cover one region and capture/reporter roles are not separable by locus.
//!
//! Operations are a closed enumeration dispatched per variant; a stage
//! configuration naming an operation the variant does not implement is
//! rejected at apply time with a structured error.

use ahash::AHashSet;
use anyhow::Result;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;
use std::path::Path;

use crate::errors::CapFilterError;
use crate::fragment;
use crate::slice::{ReadPairStatus, SliceTable};
use crate::stats::{reshape_read_stats, FilterStageStats, ReadStats, SliceStats};

pub mod capture;
pub mod tiled;
pub mod triplet;

pub use capture::CaptureFilter;
pub use tiled::TiledFilter;
pub use triplet::TripletFilter;

/// The closed set of filter operations.
///
/// Stage configurations reference operations by identifier; each variant
/// resolves the identifiers it supports in its [`SliceFilter::apply`]
/// implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// Identity pass establishing the pre-filtering snapshot.
    Raw,
    /// Keep slices with `mapped == 1`.
    RemoveUnmapped,
    /// Keep slices whose fragment has more than one unique slice.
    RemoveOrphans,
    /// Keep slices with an assigned restriction fragment.
    RemoveUnassignedReFragments,
    /// Keep the first slice per `(parent_read, restriction_fragment)` pair.
    RemoveDuplicateReFragments,
    /// Keep one fragment per duplicated coordinates string, chosen by a
    /// random permutation (PCR duplicates).
    RemoveDuplicateFragments,
    /// Drop unflashed fragments duplicating an earlier `(read_start,
    /// read_end)` span.
    RemoveDuplicatePeFragments,
    /// Keep slices with `exclusion_count < 1`.
    RemoveExcluded,
    /// Keep slices with `blacklist < 1`.
    RemoveBlacklisted,
    /// Keep fragments with at least one reporter slice (standard/triplet).
    RemoveNonReporterFragments,
    /// Keep fragments overlapping exactly one capture site (standard/triplet).
    RemoveMultiCaptureFragments,
    /// Drop non-capture slices on restriction fragments flanking a capture
    /// site (standard/triplet).
    RemoveMultiCaptureAdjacentReporters,
    /// Keep fragments with more than one reporter slice (triplet).
    RemoveSingleReporterFragments,
    /// Keep fragments with at least one capture overlap (tiled).
    RemoveNonCaptureFragments,
    /// Drop fragments touching more than one distinct capture site (tiled).
    RemoveDualCaptureFragments,
}

impl FilterOp {
    /// Stable snake_case identifier, used for logging and snapshot files.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::RemoveUnmapped => "remove_unmapped_slices",
            Self::RemoveOrphans => "remove_orphan_slices",
            Self::RemoveUnassignedReFragments => "remove_unassigned_restriction_fragments",
            Self::RemoveDuplicateReFragments => "remove_duplicate_restriction_fragments",
            Self::RemoveDuplicateFragments => "remove_duplicate_fragments",
            Self::RemoveDuplicatePeFragments => "remove_duplicate_pe_fragments",
            Self::RemoveExcluded => "remove_excluded_slices",
            Self::RemoveBlacklisted => "remove_blacklisted_slices",
            Self::RemoveNonReporterFragments => "remove_non_reporter_fragments",
            Self::RemoveMultiCaptureFragments => "remove_multi_capture_fragments",
            Self::RemoveMultiCaptureAdjacentReporters => "remove_multicapture_adjacent_reporters",
            Self::RemoveSingleReporterFragments => "remove_single_reporter_fragments",
            Self::RemoveNonCaptureFragments => "remove_non_capture_fragments",
            Self::RemoveDualCaptureFragments => "remove_dual_capture_fragments",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named pipeline stage holding an ordered list of operations.
///
/// Stages are declared once at variant construction and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterStage {
    /// Stage name, used as the `stage` key in `filter_stats`.
    pub name: String,
    /// Operations applied in order within this stage.
    pub operations: Vec<FilterOp>,
}

impl FilterStage {
    /// Creates a stage from a name and its ordered operations.
    #[must_use]
    pub fn new(name: &str, operations: Vec<FilterOp>) -> Self {
        Self { name: name.to_string(), operations }
    }
}

/// Whether and how intermediate tables are persisted while filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotMode {
    /// No intermediate output.
    #[default]
    None,
    /// Write the table once per completed stage, named by stage.
    Stage,
    /// Write the table after every operation, named by operation.
    Operation,
}

/// Construction options shared by all filter variants.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Sample name stamped onto exported statistics.
    pub sample_name: String,
    /// Read type stamped onto exported statistics (e.g. flashed).
    pub read_type: String,
    /// Seed for the PCR-duplicate random tie-break. `None` draws entropy
    /// from the OS, making duplicate survivors non-reproducible across runs.
    pub seed: Option<u64>,
}

/// Shared state and shared filter operations for all variants.
///
/// Owns the slice table exclusively for the lifetime of the variant, the
/// declared stages, the per-stage statistic snapshots and the RNG used for
/// PCR-duplicate resolution. All operations are strict row-subset
/// transforms of the current table.
pub struct FilterCore {
    table: SliceTable,
    stages: Vec<FilterStage>,
    stage_stats: Vec<FilterStageStats>,
    sample_name: String,
    read_type: String,
    rng: StdRng,
}

impl FilterCore {
    /// Creates the core from a table, a non-empty stage list and options.
    ///
    /// # Errors
    /// Fails with [`CapFilterError::NoFilterStages`] if `stages` is empty.
    pub fn new(
        table: SliceTable,
        stages: Vec<FilterStage>,
        options: &FilterOptions,
    ) -> Result<Self, CapFilterError> {
        if stages.is_empty() {
            return Err(CapFilterError::NoFilterStages);
        }
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            table,
            stages,
            stage_stats: Vec::new(),
            sample_name: options.sample_name.clone(),
            read_type: options.read_type.clone(),
            rng,
        })
    }

    /// The current slice table.
    #[must_use]
    pub fn table(&self) -> &SliceTable {
        &self.table
    }

    /// The declared pipeline stages.
    #[must_use]
    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    /// Per-stage statistic snapshots accumulated so far, in stage order.
    #[must_use]
    pub fn stage_stats(&self) -> &[FilterStageStats] {
        &self.stage_stats
    }

    /// Sample name stamped onto exported statistics.
    #[must_use]
    pub fn sample_name(&self) -> &str {
        &self.sample_name
    }

    /// Read type stamped onto exported statistics.
    #[must_use]
    pub fn read_type(&self) -> &str {
        &self.read_type
    }

    /// Snapshots the current slice-level statistics under a stage name.
    /// Snapshots accumulate monotonically and are never recomputed.
    pub fn record_stage(&mut self, stage_name: &str) {
        let stats = SliceStats::from_slices(self.table.slices());
        self.stage_stats.push(FilterStageStats::new(
            stage_name,
            &stats,
            &self.sample_name,
            &self.read_type,
        ));
    }

    /// Applies `op` if it is one of the shared operations; returns `false`
    /// for variant-specific operations so the caller can dispatch them.
    pub fn apply_shared(&mut self, op: FilterOp) -> bool {
        match op {
            FilterOp::Raw => {}
            FilterOp::RemoveUnmapped => self.remove_unmapped_slices(),
            FilterOp::RemoveOrphans => self.remove_orphan_slices(),
            FilterOp::RemoveUnassignedReFragments => self.remove_unassigned_restriction_fragments(),
            FilterOp::RemoveDuplicateReFragments => self.remove_duplicate_restriction_fragments(),
            FilterOp::RemoveDuplicateFragments => self.remove_duplicate_fragments(),
            FilterOp::RemoveDuplicatePeFragments => self.remove_duplicate_pe_fragments(),
            FilterOp::RemoveExcluded => self.remove_excluded_slices(),
            FilterOp::RemoveBlacklisted => self.remove_blacklisted_slices(),
            _ => return false,
        }
        true
    }

    /// Removes slices marked as unmapped.
    pub fn remove_unmapped_slices(&mut self) {
        self.table.retain(|s| s.mapped == 1);
    }

    /// Removes fragments with only one aligned slice. A single-slice
    /// fragment cannot hold both a capture and a reporter.
    pub fn remove_orphan_slices(&mut self) {
        let keep: AHashSet<String> = fragment::aggregate(&self.table)
            .into_iter()
            .filter(|f| f.unique_slices > 1)
            .map(|f| f.parent_read)
            .collect();
        self.retain_parent_reads(&keep);
    }

    /// Removes slices without an assigned restriction fragment.
    pub fn remove_unassigned_restriction_fragments(&mut self) {
        self.table.retain(|s| s.restriction_fragment.is_some());
    }

    /// Keeps only the first slice for each `(parent_read,
    /// restriction_fragment)` pair, so a restriction fragment is never
    /// counted twice when a read's path straddles a capture site:
    ///
    /// ```text
    /// --RE_FRAG1--\----Capture----\---RE_FRAG1----
    /// ```
    pub fn remove_duplicate_restriction_fragments(&mut self) {
        let mut seen: AHashSet<(String, Option<i64>)> = AHashSet::new();
        self.table.retain(|s| seen.insert((s.parent_read.clone(), s.restriction_fragment)));
    }

    /// Removes PCR-duplicate fragments: fragments sharing a coordinates
    /// string with another fragment, e.g.
    ///
    /// ```text
    /// frag_1:  chr1:1000-1250|chr1:1500-1750
    /// frag_2:  chr1:1000-1250|chr1:1500-1750   <- removed
    /// frag_3:  chr1:1050-1275|chr1:1600-1755
    /// frag_4:  chr1:1500-1750|chr1:1000-1250
    /// ```
    ///
    /// The survivor of each duplicate group is chosen by a uniform random
    /// permutation of the fragment rows, driven by the core RNG; supply a
    /// seed through [`FilterOptions`] for reproducible output.
    pub fn remove_duplicate_fragments(&mut self) {
        let mut fragments: Vec<(String, String)> = fragment::aggregate(&self.table)
            .into_iter()
            .map(|f| (f.parent_read, f.coordinates))
            .collect();
        fragments.shuffle(&mut self.rng);

        let mut seen: AHashSet<String> = AHashSet::new();
        let mut keep: AHashSet<String> = AHashSet::new();
        for (parent_read, coordinates) in fragments {
            if seen.insert(coordinates) {
                keep.insert(parent_read);
            }
        }
        self.retain_parent_reads(&keep);
    }

    /// Removes PCR duplicates among unflashed fragments.
    ///
    /// Sequence quality drops towards the 3' end of reads, so unflashed
    /// duplicates can differ in internal slice coordinates. They are
    /// deduplicated on the fragment span alone: the first slice's start and
    /// the last slice's end, keeping the first fragment per span in table
    /// order. No-op unless at least one slice is unflashed.
    pub fn remove_duplicate_pe_fragments(&mut self) {
        if !self.table.slices().iter().any(|s| s.pe == ReadPairStatus::Unflashed) {
            return;
        }

        let mut seen: AHashSet<(u64, u64)> = AHashSet::new();
        let mut duplicated: AHashSet<String> = AHashSet::new();
        for group in self.table.parent_groups() {
            if group[0].pe != ReadPairStatus::Unflashed {
                continue;
            }
            let span = (group[0].start, group[group.len() - 1].end);
            if !seen.insert(span) {
                duplicated.insert(group[0].parent_read.clone());
            }
        }
        self.table.retain(|s| !duplicated.contains(&s.parent_read));
    }

    /// Removes slices overlapping an exclusion region.
    pub fn remove_excluded_slices(&mut self) {
        self.table.retain(|s| s.exclusion_count < 1);
    }

    /// Removes slices overlapping a blacklisted region.
    pub fn remove_blacklisted_slices(&mut self) {
        self.table.retain(|s| s.blacklist < 1);
    }

    /// Keeps only slices whose `parent_read` is in the set.
    pub(crate) fn retain_parent_reads(&mut self, keep: &AHashSet<String>) {
        self.table.retain(|s| keep.contains(&s.parent_read));
    }
}

/// The stage pipeline executor, shared by all filter variants.
///
/// Implementors supply access to their [`FilterCore`] and variant-specific
/// operation dispatch; the provided [`filter_slices`](Self::filter_slices)
/// method drives the declared stages. A variant instance is single-use:
/// once the pipeline has run, the derived views are read-only results and
/// re-running is not supported.
pub trait SliceFilter {
    /// The shared core holding table, stages and snapshots.
    fn core(&self) -> &FilterCore;

    /// Mutable access to the shared core.
    fn core_mut(&mut self) -> &mut FilterCore;

    /// Variant name used in diagnostics.
    fn variant_name(&self) -> &'static str;

    /// Applies a single operation, replacing the table with a row subset.
    ///
    /// # Errors
    /// Fails with [`CapFilterError::UnsupportedOperation`] if the variant
    /// does not implement `op`.
    fn apply(&mut self, op: FilterOp) -> Result<(), CapFilterError>;

    /// Runs every declared stage in order, applying each stage's operations
    /// in order and snapshotting slice-level statistics after each stage.
    ///
    /// With [`SnapshotMode::Operation`] or [`SnapshotMode::Stage`] the
    /// intermediate table is additionally written to `snapshot_dir` as
    /// gzipped TSV, named by operation or stage, for debugging.
    ///
    /// # Errors
    /// Fails on an unsupported operation or on snapshot I/O errors.
    fn filter_slices(&mut self, snapshots: SnapshotMode, snapshot_dir: &Path) -> Result<()> {
        let stages = self.core().stages().to_vec();
        for stage in &stages {
            for &op in &stage.operations {
                info!("Filtering: {op}");
                self.apply(op)?;
                debug!(
                    "{} slices in {} reads remain after {op}",
                    self.core().table().len(),
                    self.core().table().unique_parent_reads()
                );
                if snapshots == SnapshotMode::Operation {
                    self.core().table().write_tsv(snapshot_dir.join(format!("{op}.tsv.gz")))?;
                }
            }
            if snapshots == SnapshotMode::Stage {
                self.core()
                    .table()
                    .write_tsv(snapshot_dir.join(format!("{}.tsv.gz", stage.name)))?;
            }
            self.core_mut().record_stage(&stage.name);
        }
        Ok(())
    }

    /// Slice-level statistics for the current table.
    fn slice_stats(&self) -> SliceStats {
        SliceStats::from_slices(self.core().table().slices())
    }

    /// Per-stage statistic snapshots, one row per completed stage in
    /// declaration order.
    fn filter_stats(&self) -> Vec<FilterStageStats> {
        self.core().stage_stats().to_vec()
    }

    /// `filter_stats` reshaped to parental-read rows.
    fn read_stats(&self) -> Vec<ReadStats> {
        reshape_read_stats(self.core().stage_stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::Slice;
    use crate::testutil::{base_slice, capture_slice, reporter_slice};

    fn core_with(slices: Vec<Slice>) -> FilterCore {
        let stages = vec![FilterStage::new("pre-filtering", vec![FilterOp::Raw])];
        let options = FilterOptions { seed: Some(11), ..Default::default() };
        FilterCore::new(SliceTable::new(slices), stages, &options).unwrap()
    }

    fn slice_names(core: &FilterCore) -> Vec<&str> {
        core.table().slices().iter().map(|s| s.slice_name.as_str()).collect()
    }

    #[test]
    fn test_empty_stages_rejected_at_construction() {
        let result =
            FilterCore::new(SliceTable::default(), Vec::new(), &FilterOptions::default());
        assert!(matches!(result, Err(CapFilterError::NoFilterStages)));
    }

    #[test]
    fn test_remove_unmapped_slices() {
        let mut unmapped = base_slice("read_a", 1);
        unmapped.mapped = 0;
        let mut core = core_with(vec![base_slice("read_a", 0), unmapped]);
        core.remove_unmapped_slices();
        assert_eq!(slice_names(&core), vec!["read_a|flashed|0"]);
    }

    #[test]
    fn test_remove_orphan_slices() {
        let mut core = core_with(vec![
            base_slice("read_a", 0),
            base_slice("read_a", 1),
            base_slice("read_b", 0),
        ]);
        core.remove_orphan_slices();
        assert!(core.table().slices().iter().all(|s| s.parent_read == "read_a"));
        assert_eq!(core.table().len(), 2);
    }

    #[test]
    fn test_remove_unassigned_restriction_fragments() {
        let mut unassigned = base_slice("read_a", 1);
        unassigned.restriction_fragment = None;
        let mut core = core_with(vec![base_slice("read_a", 0), unassigned]);
        core.remove_unassigned_restriction_fragments();
        assert_eq!(slice_names(&core), vec!["read_a|flashed|0"]);
    }

    #[test]
    fn test_remove_duplicate_restriction_fragments_keeps_first() {
        let mut core = core_with(vec![
            reporter_slice("read_a", 0, 100),
            capture_slice("read_a", 1, "probe", 105),
            reporter_slice("read_a", 2, 100),
            reporter_slice("read_b", 0, 100),
        ]);
        core.remove_duplicate_restriction_fragments();
        assert_eq!(
            slice_names(&core),
            vec!["read_a|flashed|0", "read_a|flashed|1", "read_b|flashed|0"]
        );
    }

    #[test]
    fn test_remove_duplicate_fragments_keeps_one_per_coordinate_group() {
        // read_a and read_b are coordinate-identical; read_c differs.
        for seed in [0u64, 1, 7, 42, 1337] {
            let slices = vec![
                base_slice("read_a", 0),
                base_slice("read_a", 1),
                base_slice("read_b", 0),
                base_slice("read_b", 1),
                reporter_slice("read_c", 0, 300),
            ];
            let stages = vec![FilterStage::new("pre-filtering", vec![FilterOp::Raw])];
            let options = FilterOptions { seed: Some(seed), ..Default::default() };
            let mut core =
                FilterCore::new(SliceTable::new(slices), stages, &options).unwrap();
            core.remove_duplicate_fragments();

            let survivors: Vec<&str> = core
                .table()
                .parent_groups()
                .map(|g| g[0].parent_read.as_str())
                .collect();
            assert!(survivors.contains(&"read_c"), "seed {seed}");
            assert_eq!(survivors.len(), 2, "seed {seed}");
            assert!(
                survivors.contains(&"read_a") ^ survivors.contains(&"read_b"),
                "seed {seed}: exactly one of the duplicate pair must survive"
            );
        }
    }

    #[test]
    fn test_remove_duplicate_fragments_is_reproducible_with_a_seed() {
        let build = || {
            let slices = vec![
                base_slice("read_a", 0),
                base_slice("read_a", 1),
                base_slice("read_b", 0),
                base_slice("read_b", 1),
            ];
            let stages = vec![FilterStage::new("pre-filtering", vec![FilterOp::Raw])];
            let options = FilterOptions { seed: Some(99), ..Default::default() };
            FilterCore::new(SliceTable::new(slices), stages, &options).unwrap()
        };
        let mut first = build();
        let mut second = build();
        first.remove_duplicate_fragments();
        second.remove_duplicate_fragments();
        assert_eq!(slice_names(&first), slice_names(&second));
    }

    #[test]
    fn test_remove_duplicate_pe_fragments() {
        let unflashed = |parent: &str, index: u32| Slice {
            pe: ReadPairStatus::Unflashed,
            ..base_slice(parent, index)
        };
        // read_a and read_b share the same (read_start, read_end) span;
        // read_c is flashed and must be ignored even with the same span.
        let mut core = core_with(vec![
            unflashed("read_a", 0),
            unflashed("read_a", 1),
            unflashed("read_b", 0),
            unflashed("read_b", 1),
            base_slice("read_c", 0),
            base_slice("read_c", 1),
        ]);
        core.remove_duplicate_pe_fragments();

        let survivors: Vec<&str> =
            core.table().parent_groups().map(|g| g[0].parent_read.as_str()).collect();
        assert_eq!(survivors, vec!["read_a", "read_c"]);
    }

    #[test]
    fn test_remove_duplicate_pe_fragments_noop_when_all_flashed() {
        let mut core = core_with(vec![
            base_slice("read_a", 0),
            base_slice("read_a", 1),
            base_slice("read_b", 0),
            base_slice("read_b", 1),
        ]);
        core.remove_duplicate_pe_fragments();
        assert_eq!(core.table().len(), 4);
    }

    #[test]
    fn test_remove_excluded_and_blacklisted_slices() {
        let mut excluded = base_slice("read_a", 1);
        excluded.exclusion_count = 1;
        let mut blacklisted = base_slice("read_a", 2);
        blacklisted.blacklist = 1;

        let mut core = core_with(vec![base_slice("read_a", 0), excluded, blacklisted]);
        core.remove_excluded_slices();
        core.remove_blacklisted_slices();
        assert_eq!(slice_names(&core), vec!["read_a|flashed|0"]);
    }

    #[test]
    fn test_shared_operations_shrink_monotonically() {
        let mut unmapped = base_slice("read_b", 0);
        unmapped.mapped = 0;
        let mut core = core_with(vec![
            base_slice("read_a", 0),
            base_slice("read_a", 1),
            unmapped,
            base_slice("read_c", 0),
        ]);

        let shared_ops = [
            FilterOp::Raw,
            FilterOp::RemoveUnmapped,
            FilterOp::RemoveOrphans,
            FilterOp::RemoveUnassignedReFragments,
            FilterOp::RemoveDuplicateReFragments,
            FilterOp::RemoveDuplicateFragments,
            FilterOp::RemoveDuplicatePeFragments,
            FilterOp::RemoveExcluded,
            FilterOp::RemoveBlacklisted,
        ];
        for op in shared_ops {
            let before: AHashSet<String> =
                core.table().slices().iter().map(|s| s.slice_name.clone()).collect();
            assert!(core.apply_shared(op));
            let after: AHashSet<String> =
                core.table().slices().iter().map(|s| s.slice_name.clone()).collect();
            assert!(after.is_subset(&before), "{op} must only remove rows");
        }
    }

    #[test]
    fn test_operations_preserve_emptiness() {
        let mut core = core_with(Vec::new());
        for op in [
            FilterOp::RemoveUnmapped,
            FilterOp::RemoveOrphans,
            FilterOp::RemoveDuplicateFragments,
            FilterOp::RemoveDuplicatePeFragments,
        ] {
            assert!(core.apply_shared(op));
            assert!(core.table().is_empty());
        }
    }

    #[test]
    fn test_variant_specific_ops_are_not_shared() {
        let mut core = core_with(vec![base_slice("read_a", 0)]);
        assert!(!core.apply_shared(FilterOp::RemoveNonReporterFragments));
        assert!(!core.apply_shared(FilterOp::RemoveDualCaptureFragments));
        assert_eq!(core.table().len(), 1);
    }

    #[test]
    fn test_record_stage_accumulates_in_order() {
        let mut core = core_with(vec![base_slice("read_a", 0)]);
        core.record_stage("pre-filtering");
        core.remove_unmapped_slices();
        core.record_stage("mapped");

        let stats = core.stage_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].stage, "pre-filtering");
        assert_eq!(stats[1].stage, "mapped");
        assert_eq!(stats[0].unique_slices, 1);
    }
}
