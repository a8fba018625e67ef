//! Mock version of a person writer;
use chunked_batch::{
    core::item::{ItemWriter, ItemWriterResult},
    jobs::person::Person,
};
use mockall::mock;

mock! {
    pub PersonWriter {}
    impl ItemWriter<Person> for PersonWriter {
        fn write(&self, items: &[Person]) -> ItemWriterResult;
        fn flush(&self) -> ItemWriterResult;
        fn open(&self) -> ItemWriterResult;
        fn close(&self) -> ItemWriterResult;
    }
}

impl MockPersonWriter {
    /// A mock whose `open`, `flush` and `close` always succeed.
    pub fn lenient() -> Self {
        let mut writer = MockPersonWriter::new();
        writer.expect_open().returning(|| Ok(()));
        writer.expect_flush().returning(|| Ok(()));
        writer.expect_close().returning(|| Ok(()));
        writer
    }
}
