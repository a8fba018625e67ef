use std::fmt::Debug;

use log::info;

use crate::{
    core::item::{ItemWriter, ItemWriterResult},
    BatchError,
};

/// Writes every item of a chunk to the log at `info` level.
///
/// Useful to dry-run a job before pointing it at a real store.
#[derive(Default)]
pub struct LoggerWriter {
    /// Prefix of each log line.
    label: Option<String>,
}

impl LoggerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
        }
    }
}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> ItemWriterResult {
        let label = self.label.as_deref().unwrap_or("Record");
        items.iter().for_each(|item| info!("{}:{:?}", label, item));
        Ok(())
    }

    fn flush(&self) -> Result<(), BatchError> {
        log::logger().flush();
        Ok(())
    }
}
