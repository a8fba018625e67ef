use std::{
    cell::RefCell,
    fs::File,
    io::{BufRead, BufReader, Cursor, Read},
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, StringRecord, Trim};
use log::debug;
use serde::de::DeserializeOwned;

use crate::{
    core::{
        execution::ExecutionContext,
        item::{ItemReader, ItemReaderResult},
    },
    error::BatchError,
};

enum Source {
    Path(PathBuf),
    Text(String),
}

/// Position in the open input.
struct ReaderState {
    input: Box<dyn BufRead>,
    /// Physical line number of the last line taken from `input`, 1-based.
    line_number: usize,
    /// Data lines consumed, malformed ones included. Blank and comment lines are not counted.
    consumed: usize,
}

/// A reader of delimited text where each data line is one item.
///
/// Lines are read one at a time. The first `lines_to_skip` lines, blank
/// lines and lines starting with one of the comment prefixes are ignored.
/// Every other line is split with the configured delimiter and deserialized
/// with serde, using the configured column names as header.
///
/// A line that cannot be parsed gives [`BatchError::MalformedRecord`] with its
/// line number; the line is consumed, so the next `read` moves on.
///
/// The reader is restartable: [`update`](ItemReader::update) saves the number
/// of data lines consumed under `<name>.read.count` and
/// [`open`](ItemReader::open) skips that many data lines.
///
/// # Examples
///
/// ```
/// use chunked_batch::item::flat_file::FlatFileItemReaderBuilder;
/// use chunked_batch::core::item::ItemReader;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// struct Person {
///     name: String,
///     age: i32,
/// }
///
/// let data = "\
/// -- exported nightly
/// alice,30
///
/// bob,25
/// ";
///
/// let reader = FlatFileItemReaderBuilder::new()
///     .names(&["name", "age"])
///     .comments(&["--"])
///     .from_text(data);
///
/// let person: Person = reader.read().unwrap().unwrap();
/// assert_eq!(person.name, "alice");
/// let person: Person = reader.read().unwrap().unwrap();
/// assert_eq!(person.age, 25);
/// assert!(ItemReader::<Person>::read(&reader).unwrap().is_none());
/// ```
pub struct FlatFileItemReader {
    name: String,
    source: Source,
    delimiter: u8,
    names: Option<StringRecord>,
    comments: Vec<String>,
    lines_to_skip: usize,
    strict: bool,
    state: RefCell<Option<ReaderState>>,
}

impl FlatFileItemReader {
    fn position_key(&self) -> String {
        format!("{}.read.count", self.name)
    }

    fn open_source(&self) -> Result<ReaderState, BatchError> {
        let input: Box<dyn BufRead> = match &self.source {
            Source::Path(path) => {
                let file = File::open(path).map_err(|error| {
                    BatchError::SourceUnavailable(format!("{}: {}", path.display(), error))
                })?;
                Box::new(BufReader::new(file))
            }
            Source::Text(text) => Box::new(Cursor::new(text.clone().into_bytes())),
        };

        Ok(ReaderState {
            input,
            line_number: 0,
            consumed: 0,
        })
    }

    fn is_ignored(&self, line_number: usize, line: &str) -> bool {
        if line_number <= self.lines_to_skip {
            return true;
        }
        let trimmed = line.trim();
        trimmed.is_empty()
            || self
                .comments
                .iter()
                .any(|prefix| !prefix.is_empty() && trimmed.starts_with(prefix.as_str()))
    }

    /// The next data line with its line number, or `None` at the end of input.
    ///
    /// A line that is not valid UTF-8 still counts as consumed and comes back
    /// as [`BatchError::MalformedRecord`].
    fn next_data_line(
        &self,
        state: &mut ReaderState,
    ) -> Result<Option<(usize, Result<String, BatchError>)>, BatchError> {
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            let read = state
                .input
                .read_until(b'\n', &mut buffer)
                .map_err(|error| BatchError::ItemReader(error.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            state.line_number += 1;

            if buffer.ends_with(b"\n") {
                buffer.pop();
                if buffer.ends_with(b"\r") {
                    buffer.pop();
                }
            }

            if self.is_ignored(state.line_number, &String::from_utf8_lossy(&buffer)) {
                continue;
            }

            state.consumed += 1;
            let line_number = state.line_number;
            let line = String::from_utf8(std::mem::take(&mut buffer)).map_err(|error| {
                BatchError::MalformedRecord {
                    line: line_number,
                    message: error.to_string(),
                }
            });
            return Ok(Some((line_number, line)));
        }
    }

    fn parse<T: DeserializeOwned>(&self, line_number: usize, line: &str) -> Result<T, BatchError> {
        let malformed = |message: String| BatchError::MalformedRecord {
            line: line_number,
            message,
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .delimiter(self.delimiter)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(line.as_bytes());

        let mut record = StringRecord::new();
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => return Err(malformed("empty record".to_string())),
            Err(error) => return Err(malformed(error.to_string())),
        }

        if let Some(names) = &self.names {
            if self.strict && record.len() != names.len() {
                return Err(malformed(format!(
                    "expected {} fields, found {}",
                    names.len(),
                    record.len()
                )));
            }
        }

        record
            .deserialize(self.names.as_ref())
            .map_err(|error| malformed(error.to_string()))
    }
}

impl<T: DeserializeOwned> ItemReader<T> for FlatFileItemReader {
    /// Reads the next data line.
    ///
    /// Opens the input on first use if [`open`](ItemReader::open) was not called.
    ///
    /// # Returns
    /// - `Ok(Some(item))` for a well-formed line
    /// - `Ok(None)` at the end of input
    /// - `Err(BatchError::MalformedRecord)` for a line that cannot be parsed
    /// - `Err(BatchError::SourceUnavailable)` if the input cannot be opened
    fn read(&self) -> ItemReaderResult<T> {
        let mut state = self.state.borrow_mut();
        if state.is_none() {
            *state = Some(self.open_source()?);
        }
        let Some(state) = state.as_mut() else {
            return Ok(None);
        };

        match self.next_data_line(state)? {
            Some((line_number, line)) => self.parse(line_number, &line?).map(Some),
            None => Ok(None),
        }
    }

    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        let mut state = self.open_source()?;

        if let Some(position) = context.get_usize(&self.position_key()) {
            debug!("{}: resuming after {} data lines", self.name, position);
            while state.consumed < position {
                if self.next_data_line(&mut state)?.is_none() {
                    break;
                }
            }
        }

        *self.state.borrow_mut() = Some(state);
        Ok(())
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
        if let Some(state) = self.state.borrow().as_ref() {
            context.put_usize(&self.position_key(), state.consumed);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        *self.state.borrow_mut() = None;
        Ok(())
    }
}

/// A builder for configuring a [`FlatFileItemReader`].
///
/// # Default Configuration
///
/// - Name: `flatFileItemReader`
/// - Delimiter: comma (,)
/// - Comment prefixes: `#`
/// - Column names: none, fields are deserialized by position
/// - Lines to skip: 0
/// - Strict: true, a line must have exactly one field per column name
pub struct FlatFileItemReaderBuilder {
    name: String,
    delimiter: u8,
    names: Vec<String>,
    comments: Vec<String>,
    lines_to_skip: usize,
    strict: bool,
}

impl Default for FlatFileItemReaderBuilder {
    fn default() -> Self {
        Self {
            name: "flatFileItemReader".to_string(),
            delimiter: b',',
            names: Vec::new(),
            comments: vec!["#".to_string()],
            lines_to_skip: 0,
            strict: true,
        }
    }
}

impl FlatFileItemReaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the reader; prefixes the keys it saves in the execution context.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Column names, used as header when deserializing each line.
    pub fn names(mut self, names: &[&str]) -> Self {
        self.names = names.iter().map(|name| name.to_string()).collect();
        self
    }

    /// Prefixes marking comment lines. Replaces the default `#`. Empty prefixes are ignored.
    pub fn comments(mut self, comments: &[&str]) -> Self {
        self.comments = comments.iter().map(|prefix| prefix.to_string()).collect();
        self
    }

    /// Number of lines at the top of the input to ignore, e.g. a header line.
    pub fn lines_to_skip(mut self, lines_to_skip: usize) -> Self {
        self.lines_to_skip = lines_to_skip;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Reads the file at `path`. A missing file is reported when the reader is opened.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> FlatFileItemReader {
        self.build(Source::Path(path.as_ref().to_path_buf()))
    }

    pub fn from_text(self, text: &str) -> FlatFileItemReader {
        self.build(Source::Text(text.to_string()))
    }

    /// Drains `reader` once so that the input can be replayed on restart.
    pub fn from_reader<R: Read>(self, mut reader: R) -> Result<FlatFileItemReader, BatchError> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Ok(self.build(Source::Text(text)))
    }

    fn build(self, source: Source) -> FlatFileItemReader {
        let names = if self.names.is_empty() {
            None
        } else {
            Some(StringRecord::from(self.names))
        };

        FlatFileItemReader {
            name: self.name,
            source,
            delimiter: self.delimiter,
            names,
            comments: self.comments,
            lines_to_skip: self.lines_to_skip,
            strict: self.strict,
            state: RefCell::new(None),
        }
    }
}
