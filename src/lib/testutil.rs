//! Shared helpers for unit tests.

use crate::slice::{ReadPairStatus, Slice};

/// A mapped, annotation-free slice on chr1 with deterministic coordinates.
///
/// Tests override individual fields with struct update syntax.
pub(crate) fn base_slice(parent: &str, index: u32) -> Slice {
    let start = 1000 * u64::from(index + 1);
    let end = start + 250;
    Slice {
        slice_name: format!("{parent}|flashed|{index}"),
        parent_read: parent.to_string(),
        pe: ReadPairStatus::Flashed,
        mapped: 1,
        multimapped: 0,
        slice: index,
        chrom: "chr1".to_string(),
        start,
        end,
        capture: None,
        capture_count: 0,
        exclusion: None,
        exclusion_count: 0,
        blacklist: 0,
        restriction_fragment: Some(i64::from(index) + 100),
        coordinates: format!("chr1:{start}-{end}"),
    }
}

/// A capture slice for the named probe, on the given restriction fragment.
pub(crate) fn capture_slice(parent: &str, index: u32, probe: &str, re_frag: i64) -> Slice {
    Slice {
        capture: Some(probe.to_string()),
        capture_count: 1,
        restriction_fragment: Some(re_frag),
        ..base_slice(parent, index)
    }
}

/// A reporter candidate slice on the given restriction fragment.
pub(crate) fn reporter_slice(parent: &str, index: u32, re_frag: i64) -> Slice {
    Slice { restriction_fragment: Some(re_frag), ..base_slice(parent, index) }
}
