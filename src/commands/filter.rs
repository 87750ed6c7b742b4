//! Filter annotated slices down to valid capture/reporter interactions.
//!
//! Reads an annotated slice table, runs the stage pipeline of the selected
//! filter variant and writes the surviving slices alongside the derived
//! fragment table, capture/reporter pairs and statistics.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};

use capfilter_lib::filter::{
    CaptureFilter, FilterOptions, SliceFilter, SnapshotMode, TiledFilter, TripletFilter,
};
use capfilter_lib::slice::SliceTable;
use capfilter_lib::stats::write_metrics;
use fgoxide::io::DelimFile;

use crate::commands::command::Command;

/// Filter variant to run.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FilterModeArg {
    /// Standard capture: one probe per fragment plus reporters.
    Capture,
    /// Standard capture requiring at least two reporters per fragment.
    Triplet,
    /// Tiled capture: overlapping probes covering one region.
    Tiled,
}

/// Intermediate table output while filtering.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SnapshotArg {
    /// No intermediate output.
    None,
    /// Write the table once per completed stage.
    Stage,
    /// Write the table after every operation.
    Operation,
}

impl From<SnapshotArg> for SnapshotMode {
    fn from(arg: SnapshotArg) -> Self {
        match arg {
            SnapshotArg::None => SnapshotMode::None,
            SnapshotArg::Stage => SnapshotMode::Stage,
            SnapshotArg::Operation => SnapshotMode::Operation,
        }
    }
}

/// Filter an annotated slice table.
///
/// Runs the selected filter variant's stage pipeline over the input table
/// and writes the filtered slices, derived tables and statistics under the
/// output prefix.
#[derive(Debug, Parser)]
#[command(
    name = "filter",
    about = "Filter annotated slices down to valid capture/reporter interactions",
    long_about = r#"
Filter an annotated slice table down to valid capture/reporter interactions.

VARIANTS:

  capture   Standard Capture-C: fragments must overlap exactly one capture
            probe and carry at least one reporter slice.

  triplet   As capture, but fragments must carry at least two reporter
            slices (for multi-way contact analysis).

  tiled     Tiled Capture-C: overlapping probes cover one region; fragments
            must touch exactly one capture region.

OUTPUT FILES (under --output-prefix):

  <prefix>.reporters.tsv.gz               Filtered slice table
  <prefix>.fragments.tsv.gz               Fragment-level aggregation
  <prefix>.capture_reporter_pairs.tsv.gz  Capture/reporter pairs (capture, triplet)
  <prefix>.filter_stats.tsv               Per-stage slice statistics
  <prefix>.read_stats.tsv                 Per-stage read counts
  <prefix>.cis_or_trans_stats.tsv         Cis/trans interaction counts

EXAMPLES:

  # Standard capture filtering with reproducible duplicate removal
  capfilter filter -i annotated.tsv.gz -o dox_1 --sample dox_1 --seed 42

  # Triplet filtering of unflashed reads
  capfilter filter -i annotated.tsv.gz -o dox_1 --mode triplet \
    --read-type unflashed

  # Debug a tiled run by snapshotting the table after every stage
  capfilter filter -i annotated.tsv.gz -o dox_1 --mode tiled \
    --snapshots stage --snapshot-dir snapshots/
"#
)]
pub struct FilterSlices {
    /// Input annotated slice table (TSV, gzipped if the path ends in .gz).
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Prefix for all output files.
    #[arg(short = 'o', long = "output-prefix")]
    pub output_prefix: PathBuf,

    /// Filter variant to run.
    #[arg(long = "mode", value_enum, default_value = "capture")]
    pub mode: FilterModeArg,

    /// Sample name stamped onto exported statistics.
    #[arg(long = "sample")]
    pub sample: String,

    /// Read type stamped onto exported statistics.
    #[arg(long = "read-type", default_value = "flashed")]
    pub read_type: String,

    /// Seed for duplicate-removal tie-breaking; omit for OS entropy.
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Write intermediate tables while filtering.
    #[arg(long = "snapshots", value_enum, default_value = "none")]
    pub snapshots: SnapshotArg,

    /// Directory for intermediate tables (created if missing).
    #[arg(long = "snapshot-dir", default_value = ".")]
    pub snapshot_dir: PathBuf,

    /// Restriction fragments flanking each capture site to clear of
    /// reporters (capture and triplet modes).
    #[arg(long = "n-adjacent", default_value = "1")]
    pub n_adjacent: i64,
}

impl FilterSlices {
    fn output_path(&self, suffix: &str) -> PathBuf {
        PathBuf::from(format!("{}.{suffix}", self.output_prefix.display()))
    }

    fn write_table<T: Serialize>(&self, suffix: &str, rows: &[T]) -> Result<()> {
        let path = self.output_path(suffix);
        DelimFile::default()
            .write_tsv(&path, rows)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Writes the outputs shared by every variant.
    fn write_common<F: SliceFilter>(&self, filter: &F) -> Result<()> {
        let slices_path = self.output_path("reporters.tsv.gz");
        filter.core().table().write_tsv(&slices_path)?;
        write_metrics(self.output_path("filter_stats.tsv"), &filter.filter_stats())?;
        write_metrics(self.output_path("read_stats.tsv"), &filter.read_stats())?;
        info!(
            "Wrote {} filtered slices in {} reads to {}",
            filter.core().table().len(),
            filter.core().table().unique_parent_reads(),
            slices_path.display()
        );
        Ok(())
    }

    fn run<F: SliceFilter>(&self, filter: &mut F) -> Result<()> {
        let snapshots = SnapshotMode::from(self.snapshots);
        if snapshots != SnapshotMode::None {
            std::fs::create_dir_all(&self.snapshot_dir).with_context(|| {
                format!("Failed to create snapshot directory: {}", self.snapshot_dir.display())
            })?;
        }
        filter.filter_slices(snapshots, &self.snapshot_dir)
    }
}

impl Command for FilterSlices {
    fn execute(&self) -> Result<()> {
        let table = SliceTable::from_path(&self.input)?;
        info!(
            "Loaded {} slices in {} reads from {}",
            table.len(),
            table.unique_parent_reads(),
            self.input.display()
        );
        if let Some(parent) = self.output_prefix.parent().filter(|p| *p != Path::new("")) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
        }

        let options = FilterOptions {
            sample_name: self.sample.clone(),
            read_type: self.read_type.clone(),
            seed: self.seed,
        };

        match self.mode {
            FilterModeArg::Capture => {
                let mut filter =
                    CaptureFilter::new(table, &options)?.with_n_adjacent(self.n_adjacent);
                self.run(&mut filter)?;
                self.write_common(&filter)?;
                self.write_table("fragments.tsv.gz", &filter.fragments())?;
                self.write_table(
                    "capture_reporter_pairs.tsv.gz",
                    &filter.merged_captures_and_reporters(),
                )?;
                write_metrics(
                    self.output_path("cis_or_trans_stats.tsv"),
                    &filter.cis_or_trans_stats(),
                )?;
            }
            FilterModeArg::Triplet => {
                let mut filter = TripletFilter::new(table, &options)?;
                self.run(&mut filter)?;
                self.write_common(&filter)?;
                self.write_table("fragments.tsv.gz", &filter.fragments())?;
                self.write_table(
                    "capture_reporter_pairs.tsv.gz",
                    &filter.merged_captures_and_reporters(),
                )?;
                write_metrics(
                    self.output_path("cis_or_trans_stats.tsv"),
                    &filter.cis_or_trans_stats(),
                )?;
            }
            FilterModeArg::Tiled => {
                let mut filter = TiledFilter::new(table, &options)?;
                self.run(&mut filter)?;
                self.write_common(&filter)?;
                self.write_table("fragments.tsv.gz", &filter.fragments())?;
                write_metrics(
                    self.output_path("cis_or_trans_stats.tsv"),
                    &filter.cis_or_trans_stats(),
                )?;
            }
        }
        Ok(())
    }
}
