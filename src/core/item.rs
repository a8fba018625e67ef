use crate::error::BatchError;

use super::execution::ExecutionContext;

/// Represents the result of reading an item from the reader.
///
/// `Ok(None)` signals the end of the input.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Represents the result of processing an item.
///
/// `Ok(None)` means the item is filtered out and will not reach the writer.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Represents the result of writing a chunk of items.
pub type ItemWriterResult = Result<(), BatchError>;

/// A trait for reading items one at a time.
///
/// Readers that can resume after a failure store their position in the step's
/// [`ExecutionContext`] through [`update`](ItemReader::update) and restore it in
/// [`open`](ItemReader::open).
pub trait ItemReader<I> {
    /// Reads the next item.
    ///
    /// # Returns
    /// - `Ok(Some(item))` when an item was read
    /// - `Ok(None)` when the input is exhausted
    /// - `Err(BatchError)` when the next item could not be read
    fn read(&self) -> ItemReaderResult<I>;

    /// Opens the underlying resource and moves to the position saved in `context`, if any.
    fn open(&self, _context: &ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    /// Saves the current position into `context`. Called after every committed chunk.
    fn update(&self, _context: &mut ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// A trait for transforming or validating items between reading and writing.
pub trait ItemProcessor<I, O> {
    /// Processes an item.
    ///
    /// # Returns
    /// - `Ok(Some(item))` to pass the item on to the writer
    /// - `Ok(None)` to filter the item out
    /// - `Err(BatchError)` when the item is invalid; the step's skip policy decides
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// A trait for writing a chunk of items.
///
/// `write` runs inside the transaction the step opened for the chunk; a writer
/// must not commit on its own.
pub trait ItemWriter<O> {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// A processor passing every item through unchanged.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<T: Clone> ItemProcessor<T, T> for PassThroughProcessor {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        Ok(Some(item.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_keeps_item() {
        let processor = PassThroughProcessor;
        let result = processor.process(&"value".to_string()).unwrap();
        assert_eq!(result, Some("value".to_string()));
    }
}
