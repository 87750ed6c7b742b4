//! CLI command implementations for capfilter.
//!
//! Each submodule implements a specific command:
//!
//! - [`filter`] - filter an annotated slice table down to valid
//!   capture/reporter interactions and export derived tables and statistics

// Blanket clippy pedantic allows for command implementations.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::needless_pass_by_value,
    clippy::must_use_candidate,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

pub mod command;
pub mod filter;
