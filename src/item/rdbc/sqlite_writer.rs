use log::{debug, warn};
use sqlx::{QueryBuilder, Sqlite};

use crate::core::item::{ItemWriter, ItemWriterResult};
use crate::item::rdbc::DatabaseItemBinder;
use crate::BatchError;

use super::{block_on, map_write_error, sqlite_transaction::SqliteTransactionManager};

// The number of parameters in databases must fit in a reasonable limit
const BIND_LIMIT: usize = 32766;

/// A writer inserting items into a SQLite table with one multi-row `INSERT`
/// per chunk.
///
/// The writer never commits: statements run on the transaction the step opened
/// through the shared [`SqliteTransactionManager`]. Give the step the same
/// manager with `transaction_manager(..)` so that each chunk lands entirely or
/// not at all.
///
/// Errors are classified for the step's policies:
/// - constraint violations (primary key, unique, not null, check) give
///   [`BatchError::WriteRejected`]
/// - I/O and pool failures give [`BatchError::ConnectionLost`]
/// - anything else gives [`BatchError::ItemWriter`]
///
/// # Examples
///
/// ```no_run
/// use chunked_batch::item::rdbc::sqlite_transaction::SqliteTransactionManager;
/// use chunked_batch::item::rdbc::sqlite_writer::SqliteItemWriter;
/// use chunked_batch::item::rdbc::DatabaseItemBinder;
/// use sqlx::{query_builder::Separated, Sqlite, SqlitePool};
///
/// struct Product {
///     id: i32,
///     name: String,
/// }
///
/// struct ProductBinder;
/// impl DatabaseItemBinder<Product, Sqlite> for ProductBinder {
///     fn bind(&self, item: &Product, mut query_builder: Separated<Sqlite, &str>) {
///         query_builder.push_bind(item.id);
///         query_builder.push_bind(item.name.clone());
///     }
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = SqlitePool::connect("sqlite://products.db").await?;
/// let transaction_manager = SqliteTransactionManager::new(pool);
/// let binder = ProductBinder;
///
/// let writer = SqliteItemWriter::<Product>::new()
///     .transaction_manager(&transaction_manager)
///     .table("products")
///     .add_column("id")
///     .add_column("name")
///     .item_binder(&binder);
/// # Ok(())
/// # }
/// ```
pub struct SqliteItemWriter<'a, O> {
    transaction_manager: Option<&'a SqliteTransactionManager>,
    table: Option<&'a str>,
    columns: Vec<&'a str>,
    item_binder: Option<&'a dyn DatabaseItemBinder<O, Sqlite>>,
}

impl<O> Default for SqliteItemWriter<'_, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, O> SqliteItemWriter<'a, O> {
    /// Creates a writer with nothing configured.
    ///
    /// The transaction manager, table, columns and binder must be set before the
    /// writer is opened.
    pub fn new() -> Self {
        Self {
            transaction_manager: None,
            table: None,
            columns: Vec::new(),
            item_binder: None,
        }
    }

    /// Sets the transaction manager whose open transaction receives the inserts.
    pub fn transaction_manager(mut self, transaction_manager: &'a SqliteTransactionManager) -> Self {
        self.transaction_manager = Some(transaction_manager);
        self
    }

    /// Sets the target table.
    pub fn table(mut self, table: &'a str) -> Self {
        self.table = Some(table);
        self
    }

    /// Adds a column. Columns are bound in the order they are added.
    pub fn add_column(mut self, column: &'a str) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the item binder, which pushes one value per column.
    pub fn item_binder(mut self, item_binder: &'a dyn DatabaseItemBinder<O, Sqlite>) -> Self {
        self.item_binder = Some(item_binder);
        self
    }

    fn missing(component: &str) -> BatchError {
        BatchError::Configuration(format!("SqliteItemWriter requires a {}", component))
    }

    fn table_name(&self) -> Result<&'a str, BatchError> {
        self.table.ok_or_else(|| Self::missing("table"))
    }

    fn binder(&self) -> Result<&'a dyn DatabaseItemBinder<O, Sqlite>, BatchError> {
        self.item_binder.ok_or_else(|| Self::missing("item binder"))
    }

    fn manager(&self) -> Result<&'a SqliteTransactionManager, BatchError> {
        self.transaction_manager
            .ok_or_else(|| Self::missing("transaction manager"))
    }

    /// Rows per statement so that the bound parameters stay under the limit.
    fn rows_per_statement(&self) -> usize {
        (BIND_LIMIT / self.columns.len().max(1)).max(1)
    }
}

impl<O> ItemWriter<O> for SqliteItemWriter<'_, O> {
    /// Inserts `items` on the open transaction.
    ///
    /// Chunks larger than the bind limit allows are split into several
    /// statements on the same transaction.
    fn write(&self, items: &[O]) -> ItemWriterResult {
        if items.is_empty() {
            return Ok(());
        }

        let table = self.table_name()?;
        let binder = self.binder()?;
        let manager = self.manager()?;
        if self.columns.is_empty() {
            return Err(Self::missing("column"));
        }

        manager.with_transaction(|transaction| {
            for rows in items.chunks(self.rows_per_statement()) {
                let mut query_builder = QueryBuilder::new("INSERT INTO ");
                query_builder.push(table);
                query_builder.push(" (");
                query_builder.push(self.columns.join(","));
                query_builder.push(") ");

                query_builder.push_values(rows, |b, item| {
                    binder.bind(item, b);
                });

                let query = query_builder.build();

                block_on(query.execute(&mut **transaction)).map_err(|error| {
                    let error = map_write_error(error);
                    warn!("Failed to write items to SQLite table {}: {}", table, error);
                    error
                })?;
            }

            debug!("Wrote {} items to SQLite table {}", items.len(), table);
            Ok(())
        })
    }

    /// Fails fast on an incomplete configuration.
    fn open(&self) -> ItemWriterResult {
        self.table_name()?;
        self.binder()?;
        self.manager()?;
        if self.columns.is_empty() {
            return Err(Self::missing("column"));
        }
        Ok(())
    }
}
