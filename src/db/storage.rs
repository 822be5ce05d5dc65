//! redb-based storage layer for tables, sessions and orders
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `tables` | `number` | `DiningTable` | Physical table records |
//! | `sessions` | `token` | `TableSession` | QR sessions (token unique) |
//! | `orders` | `order_id` | `Order` | Orders with embedded line items |
//! | `sequence_counter` | `()` | `u64` | Order-number counter |
//!
//! Records are stored as JSON values, one write transaction per logical
//! mutation. redb commits with immediate durability (copy-on-write, atomic
//! pointer swap), so a power cut mid-operation leaves the store consistent.
//!
//! This layer is deliberately dumb: it reads and writes rows. Invariants
//! (one active session per table, one pending order per table, no duplicate
//! line items) are enforced above it by the lifecycle components, which run
//! their multi-record steps inside a single [`WriteTransaction`].

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use thiserror::Error;

use super::models::{DiningTable, Order, OrderStatus, TableSession};

/// Physical tables: key = table number, value = JSON-serialized DiningTable
const TABLES_TABLE: TableDefinition<u32, &[u8]> = TableDefinition::new("tables");

/// Sessions: key = token, value = JSON-serialized TableSession
const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Orders: key = order id, value = JSON-serialized Order
const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

/// Counters: key = counter name, value = u64
const SEQUENCE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sequence_counter");

const ORDER_COUNT_KEY: &str = "order_count";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Store backed by redb
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(TABLES_TABLE)?;
            let _ = write_txn.open_table(SESSIONS_TABLE)?;
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let mut seq_table = write_txn.open_table(SEQUENCE_TABLE)?;
            if seq_table.get(ORDER_COUNT_KEY)?.is_none() {
                seq_table.insert(ORDER_COUNT_KEY, 0u64)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    // ========== Dining Tables ==========

    /// Insert or replace a table row (within transaction)
    pub fn put_table(&self, txn: &WriteTransaction, table: &DiningTable) -> StorageResult<()> {
        let mut t = txn.open_table(TABLES_TABLE)?;
        let value = serde_json::to_vec(table)?;
        t.insert(table.number, value.as_slice())?;
        Ok(())
    }

    /// Get a table by number
    pub fn get_table(&self, number: u32) -> StorageResult<Option<DiningTable>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(TABLES_TABLE)?;
        match t.get(number)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Get a table by number (within transaction)
    pub fn get_table_txn(
        &self,
        txn: &WriteTransaction,
        number: u32,
    ) -> StorageResult<Option<DiningTable>> {
        let t = txn.open_table(TABLES_TABLE)?;
        match t.get(number)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All tables, ordered by number
    pub fn all_tables(&self) -> StorageResult<Vec<DiningTable>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(TABLES_TABLE)?;
        let mut tables = Vec::new();
        for result in t.iter()? {
            let (_key, value) = result?;
            tables.push(serde_json::from_slice(value.value())?);
        }
        Ok(tables)
    }

    /// Hard delete a table row (within transaction)
    pub fn delete_table(&self, txn: &WriteTransaction, number: u32) -> StorageResult<bool> {
        let mut t = txn.open_table(TABLES_TABLE)?;
        Ok(t.remove(number)?.is_some())
    }

    // ========== Sessions ==========

    /// Insert or replace a session row (within transaction)
    pub fn put_session(&self, txn: &WriteTransaction, session: &TableSession) -> StorageResult<()> {
        let mut t = txn.open_table(SESSIONS_TABLE)?;
        let value = serde_json::to_vec(session)?;
        t.insert(session.token.as_str(), value.as_slice())?;
        Ok(())
    }

    /// Get a session by token
    pub fn get_session(&self, token: &str) -> StorageResult<Option<TableSession>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(SESSIONS_TABLE)?;
        match t.get(token)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Get a session by token (within transaction)
    pub fn get_session_txn(
        &self,
        txn: &WriteTransaction,
        token: &str,
    ) -> StorageResult<Option<TableSession>> {
        let t = txn.open_table(SESSIONS_TABLE)?;
        match t.get(token)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All sessions (newest first)
    pub fn all_sessions(&self) -> StorageResult<Vec<TableSession>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(SESSIONS_TABLE)?;
        let mut sessions = Vec::new();
        for result in t.iter()? {
            let (_key, value) = result?;
            sessions.push(serde_json::from_slice::<TableSession>(value.value())?);
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Sessions belonging to a table (within transaction)
    pub fn sessions_for_table_txn(
        &self,
        txn: &WriteTransaction,
        table: u32,
    ) -> StorageResult<Vec<TableSession>> {
        let t = txn.open_table(SESSIONS_TABLE)?;
        let mut sessions = Vec::new();
        for result in t.iter()? {
            let (_key, value) = result?;
            let session: TableSession = serde_json::from_slice(value.value())?;
            if session.table == table {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    /// Active sessions for a table (within transaction)
    pub fn active_sessions_for_table_txn(
        &self,
        txn: &WriteTransaction,
        table: u32,
    ) -> StorageResult<Vec<TableSession>> {
        Ok(self
            .sessions_for_table_txn(txn, table)?
            .into_iter()
            .filter(|s| s.is_active)
            .collect())
    }

    /// The active session for a table, if any
    pub fn active_session_for_table(&self, table: u32) -> StorageResult<Option<TableSession>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(SESSIONS_TABLE)?;
        let mut found: Option<TableSession> = None;
        for result in t.iter()? {
            let (_key, value) = result?;
            let session: TableSession = serde_json::from_slice(value.value())?;
            if session.table == table
                && session.is_active
                && found
                    .as_ref()
                    .map(|f| session.created_at > f.created_at)
                    .unwrap_or(true)
            {
                found = Some(session);
            }
        }
        Ok(found)
    }

    // ========== Orders ==========

    /// Insert or replace an order row (within transaction)
    pub fn put_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut t = txn.open_table(ORDERS_TABLE)?;
        let value = serde_json::to_vec(order)?;
        t.insert(order.id.as_str(), value.as_slice())?;
        Ok(())
    }

    /// Get an order by id
    pub fn get_order(&self, id: &str) -> StorageResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(ORDERS_TABLE)?;
        match t.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Get an order by id (within transaction)
    pub fn get_order_txn(&self, txn: &WriteTransaction, id: &str) -> StorageResult<Option<Order>> {
        let t = txn.open_table(ORDERS_TABLE)?;
        match t.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Orders belonging to a table, earliest first
    pub fn orders_for_table(&self, table: u32) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(ORDERS_TABLE)?;
        let mut orders = Vec::new();
        for result in t.iter()? {
            let (_key, value) = result?;
            let order: Order = serde_json::from_slice(value.value())?;
            if order.table == table {
                orders.push(order);
            }
        }
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orders)
    }

    /// Orders belonging to a table, earliest first (within transaction)
    pub fn orders_for_table_txn(
        &self,
        txn: &WriteTransaction,
        table: u32,
    ) -> StorageResult<Vec<Order>> {
        let t = txn.open_table(ORDERS_TABLE)?;
        let mut orders = Vec::new();
        for result in t.iter()? {
            let (_key, value) = result?;
            let order: Order = serde_json::from_slice(value.value())?;
            if order.table == table {
                orders.push(order);
            }
        }
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orders)
    }

    /// Pending orders for a table, earliest first (within transaction)
    pub fn pending_orders_for_table_txn(
        &self,
        txn: &WriteTransaction,
        table: u32,
    ) -> StorageResult<Vec<Order>> {
        Ok(self
            .orders_for_table_txn(txn, table)?
            .into_iter()
            .filter(|o| o.status == OrderStatus::Pending)
            .collect())
    }

    /// Non-terminal orders for a table (within transaction)
    pub fn open_orders_for_table_txn(
        &self,
        txn: &WriteTransaction,
        table: u32,
    ) -> StorageResult<Vec<Order>> {
        Ok(self
            .orders_for_table_txn(txn, table)?
            .into_iter()
            .filter(|o| !o.status.is_terminal())
            .collect())
    }

    /// Whether a non-terminal order exists for the table (derived occupancy)
    pub fn has_open_order(&self, table: u32) -> StorageResult<bool> {
        Ok(self
            .orders_for_table(table)?
            .iter()
            .any(|o| !o.status.is_terminal()))
    }

    /// Find the order containing a line item, if any
    pub fn find_order_by_item(&self, item_id: &str) -> StorageResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(ORDERS_TABLE)?;
        for result in t.iter()? {
            let (_key, value) = result?;
            let order: Order = serde_json::from_slice(value.value())?;
            if order.items.iter().any(|i| i.id == item_id) {
                return Ok(Some(order));
            }
        }
        Ok(None)
    }

    // ========== Order Number Counter ==========

    /// Allocate the next order number: `YYYYMMDD` + zero-padded counter.
    ///
    /// The counter is incremented within the caller's transaction, so a
    /// rolled-back order creation does not burn a number into a committed
    /// state that then fails.
    pub fn next_order_number(
        &self,
        txn: &WriteTransaction,
        now: chrono::DateTime<chrono::Utc>,
    ) -> StorageResult<String> {
        let mut t = txn.open_table(SEQUENCE_TABLE)?;
        let current = t.get(ORDER_COUNT_KEY)?.map(|g| g.value()).unwrap_or(0);
        let next = current + 1;
        t.insert(ORDER_COUNT_KEY, next)?;
        Ok(format!("{}{:04}", now.format("%Y%m%d"), next))
    }
}
