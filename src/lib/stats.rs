//! Statistics derived from the slice table during and after filtering.
//!
//! Slice-level aggregates are snapshotted once per completed pipeline stage;
//! fragment-level and cis/trans summaries are derived on demand from the
//! current table. All aggregates special-case the empty table and report
//! zeros rather than failing, because a table emptied mid-pipeline is a
//! normal outcome.

use anyhow::{Context, Result};
use fgoxide::io::DelimFile;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::fragment::Fragment;
use crate::slice::Slice;

/// A metric row type that can be written to a TSV file.
pub trait Metric: Serialize + for<'de> Deserialize<'de> + Clone {
    /// Human-readable name for this metric type, used in error messages.
    fn metric_name() -> &'static str;
}

/// Writes metric rows to a TSV file with consistent error handling.
///
/// # Errors
/// Returns an error if the file cannot be created or written to.
pub fn write_metrics<P: AsRef<Path>, T: Metric>(path: P, metrics: &[T]) -> Result<()> {
    let path_ref = path.as_ref();
    DelimFile::default().write_tsv(&path_ref, metrics).with_context(|| {
        format!("Failed to write {} metrics: {}", T::metric_name(), path_ref.display())
    })
}

/// Slice-level aggregate over the current table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceStats {
    /// Distinct slice names.
    pub unique_slices: u64,
    /// Distinct parental reads.
    pub unique_fragments: u64,
    /// Mapped slices.
    pub mapped_slices: u64,
    /// Multimapped slices.
    pub multimapping_slices: u64,
    /// Distinct capture probes overlapped.
    pub unique_capture_sites: u64,
    /// Slices overlapping at least one capture probe.
    pub capture_slices: u64,
    /// Slices overlapping at least one exclusion region.
    pub excluded_slices: u64,
    /// Blacklisted slice overlaps.
    pub blacklisted_slices: u64,
}

impl SliceStats {
    /// Computes slice-level statistics; an empty table yields all zeros.
    #[must_use]
    pub fn from_slices(slices: &[Slice]) -> Self {
        use ahash::AHashSet;

        let unique_slices =
            slices.iter().map(|s| s.slice_name.as_str()).collect::<AHashSet<_>>().len() as u64;
        let unique_fragments =
            slices.iter().map(|s| s.parent_read.as_str()).collect::<AHashSet<_>>().len() as u64;
        let unique_capture_sites =
            slices.iter().filter_map(|s| s.capture.as_deref()).collect::<AHashSet<_>>().len()
                as u64;

        Self {
            unique_slices,
            unique_fragments,
            mapped_slices: slices.iter().map(|s| u64::from(s.mapped)).sum(),
            multimapping_slices: slices.iter().map(|s| u64::from(s.multimapped)).sum(),
            unique_capture_sites,
            capture_slices: slices.iter().filter(|s| s.capture_count > 0).count() as u64,
            excluded_slices: slices.iter().filter(|s| s.exclusion_count > 0).count() as u64,
            blacklisted_slices: slices.iter().map(|s| u64::from(s.blacklist)).sum(),
        }
    }
}

/// One `filter_stats` row: the slice-level aggregate snapshotted after a
/// named pipeline stage completed, tagged with the sample and read type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStageStats {
    /// Pipeline stage name.
    pub stage: String,
    /// Distinct slice names after the stage.
    pub unique_slices: u64,
    /// Distinct parental reads after the stage.
    pub unique_fragments: u64,
    /// Mapped slices after the stage.
    pub mapped_slices: u64,
    /// Multimapped slices after the stage.
    pub multimapping_slices: u64,
    /// Distinct capture probes still overlapped.
    pub unique_capture_sites: u64,
    /// Capture slices after the stage.
    pub capture_slices: u64,
    /// Excluded slices after the stage.
    pub excluded_slices: u64,
    /// Blacklisted slice overlaps after the stage.
    pub blacklisted_slices: u64,
    /// Sample name.
    pub sample: String,
    /// Read type (e.g. flashed / unflashed).
    pub read_type: String,
}

impl FilterStageStats {
    /// Tags a slice-level snapshot with its stage, sample and read type.
    #[must_use]
    pub fn new(stage: &str, stats: &SliceStats, sample: &str, read_type: &str) -> Self {
        Self {
            stage: stage.to_string(),
            unique_slices: stats.unique_slices,
            unique_fragments: stats.unique_fragments,
            mapped_slices: stats.mapped_slices,
            multimapping_slices: stats.multimapping_slices,
            unique_capture_sites: stats.unique_capture_sites,
            capture_slices: stats.capture_slices,
            excluded_slices: stats.excluded_slices,
            blacklisted_slices: stats.blacklisted_slices,
            sample: sample.to_string(),
            read_type: read_type.to_string(),
        }
    }
}

impl Metric for FilterStageStats {
    fn metric_name() -> &'static str {
        "filter stage"
    }
}

/// One `read_stats` row: `filter_stats` reshaped to the parental-read level
/// for cross-pipeline aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadStats {
    /// The stage the count was snapshotted after.
    pub stat_type: String,
    /// Surviving parental reads.
    pub stat: u64,
    /// Constant pipeline step label.
    pub stage: String,
    /// Read type (e.g. flashed / unflashed).
    pub read_type: String,
    /// Sample name.
    pub sample: String,
    /// Read number within the pair (0 for combined processing).
    pub read_number: u8,
}

impl Metric for ReadStats {
    fn metric_name() -> &'static str {
        "read"
    }
}

/// Reshapes per-stage filter statistics into parental-read rows.
#[must_use]
pub fn reshape_read_stats(filter_stats: &[FilterStageStats]) -> Vec<ReadStats> {
    filter_stats
        .iter()
        .map(|row| ReadStats {
            stat_type: row.stage.clone(),
            stat: row.unique_fragments,
            stage: "filtering".to_string(),
            read_type: row.read_type.clone(),
            sample: row.sample.clone(),
            read_number: 0,
        })
        .collect()
}

/// Fragment-level aggregate over the current fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentStats {
    /// Distinct parental reads.
    pub unique_fragments: u64,
    /// Fragments with more than one mapped slice.
    pub fragments_with_multiple_mapped_slices: u64,
    /// Fragments containing a multimapping slice.
    pub fragments_with_multimapping_slices: u64,
    /// Fragments containing at least one capture slice.
    pub fragments_with_capture_sites: u64,
    /// Fragments overlapping an exclusion region.
    pub fragments_with_excluded_regions: u64,
    /// Fragments overlapping a blacklisted region.
    pub fragments_with_blacklisted_regions: u64,
    /// Fragments with at least one reporter slice.
    pub fragments_with_reporter_slices: u64,
}

impl FragmentStats {
    /// Computes fragment-level statistics; no fragments yields all zeros.
    #[must_use]
    pub fn from_fragments(fragments: &[Fragment]) -> Self {
        Self {
            unique_fragments: fragments.len() as u64,
            fragments_with_multiple_mapped_slices: fragments.iter().filter(|f| f.mapped > 1).count()
                as u64,
            fragments_with_multimapping_slices: fragments
                .iter()
                .filter(|f| f.multimapped > 0)
                .count() as u64,
            fragments_with_capture_sites: fragments.iter().filter(|f| f.capture_count > 0).count()
                as u64,
            fragments_with_excluded_regions: fragments
                .iter()
                .filter(|f| f.exclusion_count > 0)
                .count() as u64,
            fragments_with_blacklisted_regions: fragments
                .iter()
                .filter(|f| f.blacklisted_slices > 0)
                .count() as u64,
            fragments_with_reporter_slices: fragments
                .iter()
                .filter(|f| f.reporter_count > 0)
                .count() as u64,
        }
    }
}

/// One `cis_or_trans_stats` row: reporter counts per capture site, split by
/// whether the reporter shares the capture's chromosome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CisTransStats {
    /// Capture probe name.
    pub capture: String,
    /// `"cis"` or `"trans"`.
    #[serde(rename = "cis/trans")]
    pub cis_or_trans: String,
    /// Number of reporter interactions in this class.
    pub count: u64,
    /// Sample name.
    pub sample: String,
    /// Read type (e.g. flashed / unflashed).
    pub read_type: String,
}

impl Metric for CisTransStats {
    fn metric_name() -> &'static str {
        "cis/trans interaction"
    }
}

/// Labels for the two interaction classes.
pub const CIS: &str = "cis";
/// See [`CIS`].
pub const TRANS: &str = "trans";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::aggregate;
    use crate::slice::SliceTable;
    use crate::testutil::{base_slice, capture_slice, reporter_slice};
    use tempfile::NamedTempFile;

    #[test]
    fn test_slice_stats_empty_table_is_all_zeros() {
        assert_eq!(SliceStats::from_slices(&[]), SliceStats::default());
    }

    #[test]
    fn test_slice_stats_counts() {
        let mut unmapped = base_slice("read_b", 0);
        unmapped.mapped = 0;
        unmapped.multimapped = 1;
        let mut excluded = base_slice("read_b", 1);
        excluded.exclusion = Some("probe_a".to_string());
        excluded.exclusion_count = 1;

        let slices = vec![
            capture_slice("read_a", 0, "probe_a", 100),
            capture_slice("read_a", 1, "probe_b", 200),
            unmapped,
            excluded,
        ];
        let stats = SliceStats::from_slices(&slices);
        assert_eq!(stats.unique_slices, 4);
        assert_eq!(stats.unique_fragments, 2);
        assert_eq!(stats.mapped_slices, 3);
        assert_eq!(stats.multimapping_slices, 1);
        assert_eq!(stats.unique_capture_sites, 2);
        assert_eq!(stats.capture_slices, 2);
        assert_eq!(stats.excluded_slices, 1);
        assert_eq!(stats.blacklisted_slices, 0);
    }

    #[test]
    fn test_fragment_stats_counts() {
        let table = SliceTable::new(vec![
            capture_slice("read_a", 0, "probe_a", 100),
            reporter_slice("read_a", 1, 105),
            reporter_slice("read_b", 0, 110),
            reporter_slice("read_b", 1, 111),
        ]);
        let stats = FragmentStats::from_fragments(&aggregate(&table));
        assert_eq!(stats.unique_fragments, 2);
        assert_eq!(stats.fragments_with_multiple_mapped_slices, 2);
        assert_eq!(stats.fragments_with_capture_sites, 1);
        // read_b has no capture slice, so none of its slices are reporters.
        assert_eq!(stats.fragments_with_reporter_slices, 1);
    }

    #[test]
    fn test_reshape_read_stats() {
        let filter_stats = vec![
            FilterStageStats {
                stage: "pre-filtering".to_string(),
                unique_fragments: 10,
                sample: "dox_1".to_string(),
                read_type: "flashed".to_string(),
                ..Default::default()
            },
            FilterStageStats {
                stage: "mapped".to_string(),
                unique_fragments: 8,
                sample: "dox_1".to_string(),
                read_type: "flashed".to_string(),
                ..Default::default()
            },
        ];
        let read_stats = reshape_read_stats(&filter_stats);
        assert_eq!(read_stats.len(), 2);
        assert_eq!(read_stats[0].stat_type, "pre-filtering");
        assert_eq!(read_stats[0].stat, 10);
        assert_eq!(read_stats[0].stage, "filtering");
        assert_eq!(read_stats[1].stat, 8);
        assert_eq!(read_stats[1].read_number, 0);
    }

    #[test]
    fn test_write_metrics_round_trip() -> Result<()> {
        let file = NamedTempFile::with_suffix(".tsv")?;
        let rows = vec![CisTransStats {
            capture: "probe_a".to_string(),
            cis_or_trans: CIS.to_string(),
            count: 12,
            sample: "dox_1".to_string(),
            read_type: "flashed".to_string(),
        }];
        write_metrics(file.path(), &rows)?;

        let content = std::fs::read_to_string(file.path())?;
        assert!(content.starts_with("capture\tcis/trans\tcount"));

        let reread: Vec<CisTransStats> = DelimFile::default().read_tsv(&file.path())?;
        assert_eq!(reread, rows);
        Ok(())
    }

    #[test]
    fn test_write_metrics_invalid_path() {
        let rows: Vec<ReadStats> = vec![ReadStats::default()];
        let result = write_metrics("/nonexistent/dir/read_stats.tsv", &rows);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Failed to write read metrics"));
    }
}
