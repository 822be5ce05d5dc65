//! Table registry.
//!
//! Physical table records plus derived occupancy. A table is occupied iff a
//! non-terminal order (pending/confirmed/preparing/ready) exists for it —
//! holding an active session alone does not occupy a table.

use std::sync::Arc;

use redb::WriteTransaction;
use tracing::info;

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::db::{DiningTable, Order, OrderStatus, Store, TableCreate, TableUpdate};
use crate::lifecycle::{CoreError, CoreResult};
use crate::utils::Clock;

#[derive(Clone)]
pub struct TableRegistry {
    store: Store,
    audit: Arc<dyn AuditSink>,
    clock: Clock,
}

impl TableRegistry {
    pub fn new(store: Store, audit: Arc<dyn AuditSink>, clock: Clock) -> Self {
        Self {
            store,
            audit,
            clock,
        }
    }

    /// Create a table. Numbers are unique and human-facing.
    pub fn create(&self, payload: TableCreate) -> CoreResult<DiningTable> {
        if self.store.get_table(payload.number)?.is_some() {
            return Err(CoreError::Validation(format!(
                "Table {} already exists",
                payload.number
            )));
        }
        let now = self.clock.now();
        let table = DiningTable {
            number: payload.number,
            seats: payload.seats.unwrap_or(4),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let txn = self.store.begin_write()?;
        self.store.put_table(&txn, &table)?;
        txn.commit().map_err(crate::db::StorageError::from)?;
        self.audit
            .record(AuditEvent::new(AuditAction::TableCreated, &self.clock).table(table.number));
        Ok(table)
    }

    pub fn update(&self, number: u32, payload: TableUpdate) -> CoreResult<DiningTable> {
        let mut table = self
            .store
            .get_table(number)?
            .ok_or(CoreError::TableNotFound(number))?;
        if let Some(seats) = payload.seats {
            table.seats = seats;
        }
        if let Some(is_active) = payload.is_active {
            table.is_active = is_active;
        }
        table.updated_at = self.clock.now();
        let txn = self.store.begin_write()?;
        self.store.put_table(&txn, &table)?;
        txn.commit().map_err(crate::db::StorageError::from)?;
        self.audit
            .record(AuditEvent::new(AuditAction::TableUpdated, &self.clock).table(number));
        Ok(table)
    }

    /// Delete a table. Refused while occupied.
    pub fn delete(&self, number: u32) -> CoreResult<bool> {
        if self.store.get_table(number)?.is_none() {
            return Err(CoreError::TableNotFound(number));
        }
        if self.is_occupied(number)? {
            return Err(CoreError::TableOccupied(number));
        }
        let txn = self.store.begin_write()?;
        let removed = self.store.delete_table(&txn, number)?;
        txn.commit().map_err(crate::db::StorageError::from)?;
        if removed {
            self.audit
                .record(AuditEvent::new(AuditAction::TableDeleted, &self.clock).table(number));
        }
        Ok(removed)
    }

    pub fn get(&self, number: u32) -> CoreResult<DiningTable> {
        self.store
            .get_table(number)?
            .ok_or(CoreError::TableNotFound(number))
    }

    pub fn list(&self) -> CoreResult<Vec<DiningTable>> {
        let mut tables = self.store.all_tables()?;
        tables.sort_by_key(|t| t.number);
        Ok(tables)
    }

    /// Derived occupancy; purely a query, no mutation.
    pub fn is_occupied(&self, number: u32) -> CoreResult<bool> {
        Ok(self.store.has_open_order(number)?)
    }

    /// The table's current non-terminal order, if any (earliest first).
    pub fn current_order(&self, number: u32) -> CoreResult<Option<Order>> {
        Ok(self
            .store
            .orders_for_table(number)?
            .into_iter()
            .find(|o| !o.status.is_terminal()))
    }

    /// Transition every non-terminal order of the table to cancelled
    /// (within the caller's transaction). Returns the cancelled orders.
    ///
    /// Idempotent: already-terminal orders are untouched, so a second call
    /// cancels nothing and emits no audit events.
    pub fn cancel_open_orders(
        &self,
        txn: &WriteTransaction,
        table: u32,
        operator: Option<&str>,
    ) -> CoreResult<Vec<Order>> {
        let open = self.store.open_orders_for_table_txn(txn, table)?;
        let mut cancelled = Vec::with_capacity(open.len());
        for mut order in open {
            order.status = OrderStatus::Cancelled;
            order.updated_at = self.clock.now();
            self.store.put_order(txn, &order)?;
            info!(table, order_id = %order.id, "cancelled order");
            let mut event =
                AuditEvent::new(AuditAction::OrderCancelled, &self.clock).table(table);
            event = event.order(order.id.clone());
            if let Some(op) = operator {
                event = event.operator(op);
            }
            self.audit.record(event);
            cancelled.push(order);
        }
        Ok(cancelled)
    }

    /// Transition still-pending draft orders to cancelled (within the
    /// caller's transaction). Used by expiry cleanup, which must not touch
    /// confirmed orders.
    pub fn cancel_pending_orders(
        &self,
        txn: &WriteTransaction,
        table: u32,
    ) -> CoreResult<Vec<Order>> {
        let pending = self.store.pending_orders_for_table_txn(txn, table)?;
        let mut cancelled = Vec::with_capacity(pending.len());
        for mut order in pending {
            order.status = OrderStatus::Cancelled;
            order.updated_at = self.clock.now();
            self.store.put_order(txn, &order)?;
            self.audit.record(
                AuditEvent::new(AuditAction::OrderCancelled, &self.clock)
                    .table(table)
                    .order(order.id.clone()),
            );
            cancelled.push(order);
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordingSink;
    use crate::db::CustomerRef;

    fn registry() -> (TableRegistry, Store, Arc<RecordingSink>) {
        let store = Store::open_in_memory().unwrap();
        let sink = RecordingSink::new();
        let registry = TableRegistry::new(store.clone(), sink.clone(), Clock::system());
        (registry, store, sink)
    }

    #[test]
    fn create_rejects_duplicate_numbers() {
        let (registry, _, _) = registry();
        registry
            .create(TableCreate {
                number: 5,
                seats: Some(4),
            })
            .unwrap();
        let err = registry
            .create(TableCreate {
                number: 5,
                seats: None,
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn occupancy_is_derived_from_open_orders() {
        let (registry, store, _) = registry();
        registry
            .create(TableCreate {
                number: 5,
                seats: None,
            })
            .unwrap();
        assert!(!registry.is_occupied(5).unwrap());

        let txn = store.begin_write().unwrap();
        let order = Order::new_pending(
            "202601010001".into(),
            5,
            CustomerRef::anonymous(),
            chrono::Utc::now(),
        );
        store.put_order(&txn, &order).unwrap();
        txn.commit().unwrap();

        assert!(registry.is_occupied(5).unwrap());
        let err = registry.delete(5).unwrap_err();
        assert!(matches!(err, CoreError::TableOccupied(5)));
    }

    #[test]
    fn cancel_open_orders_is_idempotent() {
        let (registry, store, sink) = registry();
        let txn = store.begin_write().unwrap();
        let order = Order::new_pending(
            "202601010001".into(),
            7,
            CustomerRef::anonymous(),
            chrono::Utc::now(),
        );
        store.put_order(&txn, &order).unwrap();
        txn.commit().unwrap();

        let txn = store.begin_write().unwrap();
        let cancelled = registry.cancel_open_orders(&txn, 7, None).unwrap();
        txn.commit().unwrap();
        assert_eq!(cancelled.len(), 1);

        let txn = store.begin_write().unwrap();
        let again = registry.cancel_open_orders(&txn, 7, None).unwrap();
        txn.commit().unwrap();
        assert!(again.is_empty());
        assert_eq!(sink.count(AuditAction::OrderCancelled), 1);
    }
}
