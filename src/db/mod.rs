//! Persistence layer: record types and the redb-backed store.

pub mod models;
pub mod storage;

pub use models::{
    CustomerRef, DiningTable, LineItem, Order, OrderStatus, TableCreate, TableSession, TableUpdate,
};
pub use storage::{Store, StorageError, StorageResult};
