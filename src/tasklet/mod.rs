//! # Tasklet Module
//!
//! Tasklets are single-task operations that don't follow the chunk-oriented
//! processing pattern. They run as the [`Action`](crate::core::step::StepBehavior::Action)
//! of a step.

/// A tasklet printing a message to standard output.
pub mod print;
