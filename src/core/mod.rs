use rand::distr::{Alphanumeric, SampleString};

/// Lifecycle records of jobs and steps: instances, executions, statuses.
pub mod execution;

pub mod item;

pub mod job;

/// Typed job parameters, instance identity, validation and incrementers.
pub mod parameters;

pub mod policy;

pub mod step;

pub mod transaction;

/// Generates a random name consisting of alphanumeric characters.
///
/// # Returns
///
/// A `String` containing the generated random name.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}
