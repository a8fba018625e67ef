#[cfg(feature = "logger")]
/// This module provides a writer logging each item, for debugging.
pub mod logger;

#[cfg(feature = "csv")]
/// This module provides a restartable reader of delimited text files.
pub mod flat_file;

#[cfg(feature = "rdbc")]
/// This module provides transactional relational database writers.
pub mod rdbc;
