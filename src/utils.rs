//! Dataset maintenance utilities.
//!
//! These operations mutate datasets on disk and are deliberately kept out
//! of the [`Dataset`](crate::dataset::Dataset) type so destructive calls
//! are always explicit.

mod delete;
mod trim;

pub use delete::delete_dataset;
pub use trim::trim_dataset;
