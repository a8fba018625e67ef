//! The two sample configurations of the engine.
//!
//! Assembly is plain functions over a [`BatchConfig`](crate::config::BatchConfig):
//! the caller owns every component and the functions wire them into steps
//! and jobs.

/// A single-action job printing a greeting.
pub mod hello;

/// The record type of the person import.
pub mod person;

#[cfg(all(feature = "csv", feature = "rdbc-sqlite"))]
#[cfg_attr(docsrs, doc(cfg(all(feature = "csv", feature = "rdbc-sqlite"))))]
/// Import of a delimited person file into a SQLite table.
pub mod person_import;
