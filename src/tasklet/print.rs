use log::debug;

use crate::{
    core::{
        execution::StepExecution,
        step::{RepeatStatus, Tasklet},
    },
    BatchError,
};

/// Prints a message to standard output once, then finishes.
///
/// # Examples
///
/// ```
/// use chunked_batch::core::step::StepBuilder;
/// use chunked_batch::tasklet::print::PrintTasklet;
///
/// let tasklet = PrintTasklet::default();
/// let step = StepBuilder::new("hello").tasklet(&tasklet).build();
/// assert_eq!(tasklet.message(), "Hello world!");
/// ```
pub struct PrintTasklet {
    message: String,
}

impl PrintTasklet {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Default for PrintTasklet {
    fn default() -> Self {
        Self::new("Hello world!")
    }
}

impl Tasklet for PrintTasklet {
    fn execute(&self, step_execution: &StepExecution) -> Result<RepeatStatus, BatchError> {
        debug!("Printing from step {}", step_execution.step_name);
        println!("{}", self.message);
        Ok(RepeatStatus::Finished)
    }
}
