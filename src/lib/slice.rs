//! The annotated slice table consumed by the filter engine.
//!
//! A slice is one contiguous aligned segment of a sequenced fragment. Slices
//! arrive annotated with capture-probe, exclusion-region, blacklist and
//! restriction-fragment overlaps; the filter variants whittle the table down
//! to valid capture/reporter combinations.
//!
//! On disk the table is a TSV in which absent annotations are encoded with a
//! `"."` sentinel. In memory the sentinel becomes an [`Option`], so counting
//! logic can ask for "present values" directly instead of correcting unique
//! counts for the sentinel.

use anyhow::{Context, Result};
use fgoxide::io::{DelimFile, Io};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;

use crate::errors::CapFilterError;

/// Columns that must be present in an input slice table.
///
/// Validated against the TSV header before deserialization so that a schema
/// problem is reported by column name rather than as a parse failure.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "slice_name",
    "parent_read",
    "pe",
    "mapped",
    "multimapped",
    "slice",
    "chrom",
    "start",
    "end",
    "capture",
    "capture_count",
    "exclusion",
    "exclusion_count",
    "blacklist",
    "restriction_fragment",
    "coordinates",
];

/// Whether the two reads of a pair were combined into a single sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPairStatus {
    /// Read pair merged into one read by overlap.
    Flashed,
    /// Read pair kept as two reads; 3' coordinates are less reliable.
    Unflashed,
}

/// Serde adapter mapping the `"."` sentinel to `None` for string annotations.
pub(crate) mod dot_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_deref().unwrap_or("."))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(if raw == "." { None } else { Some(raw) })
    }
}

/// Serde adapter mapping the `"."` sentinel to `None` for integer identifiers.
pub(crate) mod dot_i64 {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_i64(*v),
            None => serializer.serialize_str("."),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "." {
            return Ok(None);
        }
        raw.parse::<i64>()
            .map(Some)
            .map_err(|e| D::Error::custom(format!("invalid restriction fragment id '{raw}': {e}")))
    }
}

/// One annotated slice row.
///
/// Identity fields are immutable; filtering only ever removes whole rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    /// Unique aligned segment identifier (e.g. `XZKG:889:11|flashed|1`).
    pub slice_name: String,
    /// Identifier shared by all slices from the same parental read.
    pub parent_read: String,
    /// Combined-read status of the parent.
    pub pe: ReadPairStatus,
    /// Alignment is mapped (0/1).
    pub mapped: u8,
    /// Alignment is multimapped (0/1).
    pub multimapped: u8,
    /// Slice order index within the parent read (5' to 3').
    pub slice: u32,
    /// Chromosome.
    pub chrom: String,
    /// Start coordinate.
    pub start: u64,
    /// End coordinate.
    pub end: u64,
    /// Capture probe overlapping this slice, if any.
    #[serde(with = "dot_string")]
    pub capture: Option<String>,
    /// Number of capture probes overlapping this slice.
    pub capture_count: u32,
    /// Exclusion region overlapping this slice, if any.
    #[serde(with = "dot_string")]
    pub exclusion: Option<String>,
    /// Number of exclusion regions overlapping this slice.
    pub exclusion_count: u32,
    /// Blacklisted region overlap count.
    pub blacklist: u32,
    /// Restriction fragment containing this slice, if assigned. Identifiers
    /// are dense, ordered integers along the genome, so `id ± 1` addresses
    /// the immediately flanking fragments.
    #[serde(with = "dot_i64")]
    pub restriction_fragment: Option<i64>,
    /// Canonical `chrom:start-end` encoding, the cross-fragment duplicate key.
    pub coordinates: String,
}

impl Slice {
    /// True if a capture probe overlaps this slice.
    #[must_use]
    pub fn is_capture(&self) -> bool {
        self.capture.is_some()
    }
}

/// The row-oriented slice dataset owned by one filter variant instance.
///
/// Rows are kept sorted by `(parent_read, slice)` at all times so that row
/// order within a fragment reflects 5'→3' slice order; several operations
/// depend on first/last-slice semantics and order-preserving concatenation.
/// Filtering only removes rows, which preserves the sort.
#[derive(Debug, Clone, Default)]
pub struct SliceTable {
    slices: Vec<Slice>,
}

impl SliceTable {
    /// Creates a table from slice records, sorting by `(parent_read, slice)`.
    #[must_use]
    pub fn new(mut slices: Vec<Slice>) -> Self {
        slices.sort_by(|a, b| {
            a.parent_read.cmp(&b.parent_read).then_with(|| a.slice.cmp(&b.slice))
        });
        Self { slices }
    }

    /// Reads an annotated slice table from a TSV file (gzipped if the path
    /// ends in `.gz`).
    ///
    /// # Errors
    /// Fails with [`CapFilterError::MissingColumn`] naming the first absent
    /// required column, or with an I/O / parse error for malformed rows.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        validate_slice_header(path)?;
        let slices: Vec<Slice> = DelimFile::default()
            .read_tsv(&path)
            .with_context(|| format!("Failed to read slice table: {}", path.display()))?;
        Ok(Self::new(slices))
    }

    /// Writes the current table as TSV (gzipped if the path ends in `.gz`).
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written to.
    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        DelimFile::default()
            .write_tsv(&path, &self.slices)
            .with_context(|| format!("Failed to write slice table: {}", path.display()))
    }

    /// The current rows, sorted by `(parent_read, slice)`.
    #[must_use]
    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    /// Number of slices currently in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    /// True if no slices remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Number of distinct parental reads currently represented.
    #[must_use]
    pub fn unique_parent_reads(&self) -> usize {
        self.parent_groups().count()
    }

    /// Keeps only slices matching the predicate. Row order (and therefore
    /// the table sort) is preserved.
    pub fn retain<F: FnMut(&Slice) -> bool>(&mut self, f: F) {
        self.slices.retain(f);
    }

    /// Iterates over runs of slices sharing a `parent_read`, in table order.
    ///
    /// Because the table is sorted by `(parent_read, slice)`, each run is one
    /// complete fragment with its slices in 5'→3' order.
    pub fn parent_groups(&self) -> impl Iterator<Item = &[Slice]> {
        self.slices.chunk_by(|a, b| a.parent_read == b.parent_read)
    }
}

/// Checks that the header line of a slice TSV carries every required column.
fn validate_slice_header(path: &Path) -> Result<()> {
    let mut reader = Io::default()
        .new_reader(&path)
        .with_context(|| format!("Failed to open slice table: {}", path.display()))?;
    let mut header = String::new();
    reader
        .read_line(&mut header)
        .with_context(|| format!("Failed to read header: {}", path.display()))?;
    if header.trim().is_empty() {
        return Err(CapFilterError::InvalidFileFormat {
            file_type: "slice table".to_string(),
            path: path.display().to_string(),
            reason: "missing header line".to_string(),
        }
        .into());
    }

    let columns: Vec<&str> = header.trim_end().split('\t').collect();
    for required in REQUIRED_COLUMNS {
        if !columns.contains(required) {
            return Err(CapFilterError::MissingColumn { column: (*required).to_string() }.into());
        }
    }
    Ok(())
}
