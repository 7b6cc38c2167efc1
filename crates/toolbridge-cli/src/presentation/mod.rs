//! Shared CLI presentation utilities. Format-only; no domain logic.

pub mod tables;

pub use tables::{format_optional, print_separator, truncate_string};
