//! Cart engine.
//!
//! The cart IS the table's pending order. Adding a product that is already
//! in the cart REPLACES its quantity (the client always sends the desired
//! total, so retries are harmless). Prices are snapshotted from the catalog
//! when a row is first created and never re-read afterwards.
//!
//! Two self-healing repairs run before any cart mutation: duplicate pending
//! orders collapse into the earliest one, and duplicate line items for the
//! same product merge into the earliest row. Both are audited, never
//! surfaced as errors.

use std::sync::Arc;

use redb::WriteTransaction;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::catalog::Catalog;
use crate::db::{CustomerRef, LineItem, Order, OrderStatus, Store};
use crate::lifecycle::coordinator::SubmitPayload;
use crate::lifecycle::{CoreError, CoreResult};
use crate::utils::Clock;

#[derive(Clone)]
pub struct CartEngine {
    store: Store,
    catalog: Arc<dyn Catalog>,
    audit: Arc<dyn AuditSink>,
    clock: Clock,
}

impl CartEngine {
    pub fn new(
        store: Store,
        catalog: Arc<dyn Catalog>,
        audit: Arc<dyn AuditSink>,
        clock: Clock,
    ) -> Self {
        Self {
            store,
            catalog,
            audit,
            clock,
        }
    }

    /// The table's pending order, or a fresh empty one (within the caller's
    /// transaction).
    ///
    /// If several pending orders exist the earliest wins: later duplicates
    /// donate their items and are cancelled.
    pub fn ensure_pending_order_txn(
        &self,
        txn: &WriteTransaction,
        table: u32,
        customer: &CustomerRef,
    ) -> CoreResult<Order> {
        let mut pending = self.store.pending_orders_for_table_txn(txn, table)?;
        let mut order = match pending.len() {
            0 => {
                let now = self.clock.now();
                let number = self.store.next_order_number(txn, now)?;
                let order = Order::new_pending(number, table, customer.clone(), now);
                self.store.put_order(txn, &order)?;
                debug!(table, order_id = %order.id, "opened cart");
                order
            }
            1 => pending.remove(0),
            n => {
                warn!(table, count = n, "merging duplicate pending orders");
                let mut earliest = pending.remove(0);
                let mut merged_ids = Vec::with_capacity(n - 1);
                for mut dup in pending {
                    earliest.items.append(&mut dup.items);
                    dup.status = OrderStatus::Cancelled;
                    dup.updated_at = self.clock.now();
                    self.store.put_order(txn, &dup)?;
                    merged_ids.push(dup.id);
                }
                self.audit.record(
                    AuditEvent::new(AuditAction::DuplicateOrdersMerged, &self.clock)
                        .table(table)
                        .order(earliest.id.clone())
                        .details(serde_json::json!({ "merged": merged_ids })),
                );
                earliest
            }
        };
        self.repair_items_txn(txn, &mut order)?;
        Ok(order)
    }

    /// Set the quantity for a product in the table's cart, creating the row
    /// (with a price snapshot) on first add.
    pub fn add_item_txn(
        &self,
        txn: &WriteTransaction,
        table: u32,
        customer: &CustomerRef,
        product_id: u32,
        quantity: u32,
        notes: Option<&str>,
    ) -> CoreResult<Order> {
        if quantity == 0 {
            return Err(CoreError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }
        let product = self
            .catalog
            .get_product(product_id)
            .ok_or_else(|| CoreError::Validation(format!("product {product_id} not found")))?;
        if !product.is_orderable() {
            return Err(CoreError::ProductUnavailable {
                product_id,
                name: product.name,
            });
        }

        let mut order = self.ensure_pending_order_txn(txn, table, customer)?;
        match order.items.iter_mut().find(|i| i.product_id == product_id) {
            Some(existing) => {
                // Replace, not increment. The captured price stays.
                existing.quantity = quantity;
                if let Some(notes) = notes {
                    existing.notes = notes.to_string();
                }
            }
            None => {
                let mut item = LineItem::new(product_id, quantity, product.price, self.clock.now());
                if let Some(notes) = notes {
                    item.notes = notes.to_string();
                }
                order.items.push(item);
            }
        }
        order.recompute_totals();
        order.updated_at = self.clock.now();
        self.store.put_order(txn, &order)?;
        Ok(order)
    }

    /// Update a line item's quantity and/or notes. Quantity zero removes
    /// the row.
    pub fn update_item_txn(
        &self,
        txn: &WriteTransaction,
        table: u32,
        item_id: &str,
        quantity: Option<u32>,
        notes: Option<&str>,
    ) -> CoreResult<Order> {
        let mut order = self.owning_cart_txn(txn, table, item_id)?;
        match quantity {
            Some(0) => order.items.retain(|i| i.id != item_id),
            Some(q) => {
                let item = order
                    .items
                    .iter_mut()
                    .find(|i| i.id == item_id)
                    .ok_or_else(|| CoreError::ItemNotFound(item_id.to_string()))?;
                item.quantity = q;
                if let Some(notes) = notes {
                    item.notes = notes.to_string();
                }
            }
            None => {
                if let Some(notes) = notes {
                    let item = order
                        .items
                        .iter_mut()
                        .find(|i| i.id == item_id)
                        .ok_or_else(|| CoreError::ItemNotFound(item_id.to_string()))?;
                    item.notes = notes.to_string();
                }
            }
        }
        order.recompute_totals();
        order.updated_at = self.clock.now();
        self.store.put_order(txn, &order)?;
        Ok(order)
    }

    /// Remove a line item from the table's cart.
    pub fn remove_item_txn(
        &self,
        txn: &WriteTransaction,
        table: u32,
        item_id: &str,
    ) -> CoreResult<Order> {
        let mut order = self.owning_cart_txn(txn, table, item_id)?;
        order.items.retain(|i| i.id != item_id);
        order.recompute_totals();
        order.updated_at = self.clock.now();
        self.store.put_order(txn, &order)?;
        Ok(order)
    }

    /// Empty every pending cart of the table (within the caller's
    /// transaction). Order rows are kept, totals zeroed. Returns
    /// `(order_id, items_removed)` for each cart that actually held items;
    /// an already-empty cart is left untouched and unaudited.
    pub fn discard_txn(
        &self,
        txn: &WriteTransaction,
        table: u32,
    ) -> CoreResult<Vec<(String, usize)>> {
        let mut discarded = Vec::new();
        for mut order in self.store.pending_orders_for_table_txn(txn, table)? {
            if order.items.is_empty() {
                continue;
            }
            let removed = order.items.len();
            order.items.clear();
            order.total_amount = Decimal::ZERO;
            order.discount_amount = Decimal::ZERO;
            order.final_amount = Decimal::ZERO;
            order.updated_at = self.clock.now();
            self.store.put_order(txn, &order)?;
            self.audit.record(
                AuditEvent::new(AuditAction::CartDiscarded, &self.clock)
                    .table(table)
                    .order(order.id.clone())
                    .details(serde_json::json!({ "items_removed": removed })),
            );
            discarded.push((order.id, removed));
        }
        Ok(discarded)
    }

    /// Confirm the table's cart as a real order.
    ///
    /// Idempotent on retry: if the payload names an order that is already
    /// past pending, that order is returned unchanged. Returns the order and
    /// whether this call confirmed it.
    pub fn submit_txn(
        &self,
        txn: &WriteTransaction,
        table: u32,
        payload: &SubmitPayload,
    ) -> CoreResult<(Order, bool)> {
        if let Some(id) = &payload.order_id
            && let Some(existing) = self.store.get_order_txn(txn, id)?
        {
            if existing.table != table {
                return Err(CoreError::Unauthorized(format!(
                    "order {id} belongs to another table"
                )));
            }
            if existing.status != OrderStatus::Pending {
                debug!(table, order_id = %id, "submit retry, order already confirmed");
                return Ok((existing, false));
            }
        }

        let customer = payload.customer.clone().unwrap_or_else(CustomerRef::anonymous);
        let mut order = self.ensure_pending_order_txn(txn, table, &customer)?;

        // A payload with items is authoritative: the cart is rebuilt to
        // match it, keeping captured prices for rows that survive.
        if !payload.items.is_empty() {
            let mut items = Vec::with_capacity(payload.items.len());
            for wanted in &payload.items {
                if wanted.quantity == 0 {
                    continue;
                }
                // Payload price wins, then the price already captured in
                // the cart, then the catalog for a row new to this table.
                let captured = order
                    .items
                    .iter()
                    .find(|i| i.product_id == wanted.product_id)
                    .map(|i| i.price);
                let price = match wanted.price.or(captured) {
                    Some(price) => price,
                    None => {
                        let product =
                            self.catalog.get_product(wanted.product_id).ok_or_else(|| {
                                CoreError::Validation(format!(
                                    "product {} not found",
                                    wanted.product_id
                                ))
                            })?;
                        if !product.is_orderable() {
                            return Err(CoreError::ProductUnavailable {
                                product_id: wanted.product_id,
                                name: product.name,
                            });
                        }
                        product.price
                    }
                };
                let mut item =
                    LineItem::new(wanted.product_id, wanted.quantity, price, self.clock.now());
                if let Some(notes) = &wanted.notes {
                    item.notes = notes.clone();
                }
                items.push(item);
            }
            order.items = items;
            order.merge_duplicate_items();
        }

        if order.items.is_empty() {
            return Err(CoreError::Validation(
                "cannot submit an empty cart".to_string(),
            ));
        }

        order.customer = customer;
        if let Some(notes) = &payload.notes {
            order.notes = notes.clone();
        }
        order.status = OrderStatus::Confirmed;
        order.recompute_totals();
        order.updated_at = self.clock.now();
        self.store.put_order(txn, &order)?;
        self.audit.record(
            AuditEvent::new(AuditAction::OrderConfirmed, &self.clock)
                .table(table)
                .order(order.id.clone())
                .details(serde_json::json!({
                    "order_number": order.order_number,
                    "final_amount": order.final_amount,
                })),
        );
        Ok((order, true))
    }

    /// Mark a confirmed order as delivered.
    pub fn deliver_txn(
        &self,
        txn: &WriteTransaction,
        order_id: &str,
        operator: Option<&str>,
    ) -> CoreResult<Order> {
        let mut order = self
            .store
            .get_order_txn(txn, order_id)?
            .ok_or_else(|| CoreError::OrderNotFound(order_id.to_string()))?;
        match order.status {
            OrderStatus::Confirmed | OrderStatus::Preparing | OrderStatus::Ready => {}
            OrderStatus::Delivered => return Ok(order),
            status => {
                return Err(CoreError::Validation(format!(
                    "order {order_id} cannot be delivered from status {status:?}"
                )));
            }
        }
        order.status = OrderStatus::Delivered;
        order.updated_at = self.clock.now();
        self.store.put_order(txn, &order)?;
        let mut event = AuditEvent::new(AuditAction::OrderDelivered, &self.clock)
            .table(order.table)
            .order(order.id.clone());
        if let Some(op) = operator {
            event = event.operator(op);
        }
        self.audit.record(event);
        Ok(order)
    }

    /// The table's current cart (earliest pending order), read-only.
    pub fn current_cart(&self, table: u32) -> CoreResult<Option<Order>> {
        Ok(self
            .store
            .orders_for_table(table)?
            .into_iter()
            .find(|o| o.status == OrderStatus::Pending))
    }

    /// Locate the pending order of `table` that owns `item_id`. An item
    /// living under another table's order is a caller error, not a miss.
    fn owning_cart_txn(
        &self,
        txn: &WriteTransaction,
        table: u32,
        item_id: &str,
    ) -> CoreResult<Order> {
        for order in self.store.pending_orders_for_table_txn(txn, table)? {
            if order.items.iter().any(|i| i.id == item_id) {
                return Ok(order);
            }
        }
        if self.store.find_order_by_item(item_id)?.is_some() {
            return Err(CoreError::Unauthorized(format!(
                "item {item_id} does not belong to table {table}"
            )));
        }
        Err(CoreError::ItemNotFound(item_id.to_string()))
    }

    fn repair_items_txn(&self, txn: &WriteTransaction, order: &mut Order) -> CoreResult<()> {
        let removed = order.merge_duplicate_items();
        if removed > 0 {
            warn!(table = order.table, order_id = %order.id, removed, "merged duplicate line items");
            order.recompute_totals();
            order.updated_at = self.clock.now();
            self.store.put_order(txn, order)?;
            self.audit.record(
                AuditEvent::new(AuditAction::DuplicateItemsMerged, &self.clock)
                    .table(order.table)
                    .order(order.id.clone())
                    .details(serde_json::json!({ "rows_removed": removed })),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordingSink;
    use crate::catalog::{ProductCatalog, ProductInfo};
    use rust_decimal_macros::dec;

    fn product(id: u32, name: &str, price: Decimal) -> ProductInfo {
        ProductInfo {
            id,
            name: name.to_string(),
            price,
            is_active: true,
            is_available: true,
        }
    }

    fn cart_engine() -> (CartEngine, Store, Arc<ProductCatalog>, Arc<RecordingSink>) {
        let store = Store::open_in_memory().unwrap();
        let catalog = ProductCatalog::new();
        catalog.upsert(product(1, "Espresso", dec!(2.50)));
        catalog.upsert(product(2, "Carbonara", dec!(11.00)));
        let sink = RecordingSink::new();
        let engine = CartEngine::new(
            store.clone(),
            catalog.clone(),
            sink.clone(),
            Clock::system(),
        );
        (engine, store, catalog, sink)
    }

    fn add(engine: &CartEngine, store: &Store, table: u32, product_id: u32, qty: u32) -> Order {
        let txn = store.begin_write().unwrap();
        let order = engine
            .add_item_txn(&txn, table, &CustomerRef::anonymous(), product_id, qty, None)
            .unwrap();
        txn.commit().unwrap();
        order
    }

    #[test]
    fn adding_the_same_product_replaces_the_quantity() {
        let (engine, store, _, _) = cart_engine();
        add(&engine, &store, 5, 1, 2);
        let order = add(&engine, &store, 5, 1, 3);

        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, 3);
        assert_eq!(order.total_amount, dec!(7.50));
    }

    #[test]
    fn price_is_captured_on_first_add() {
        let (engine, store, catalog, _) = cart_engine();
        add(&engine, &store, 5, 1, 1);

        catalog.upsert(product(1, "Espresso", dec!(99.00)));
        let order = add(&engine, &store, 5, 1, 2);

        assert_eq!(order.items[0].price, dec!(2.50));
        assert_eq!(order.total_amount, dec!(5.00));
    }

    #[test]
    fn unavailable_product_is_rejected() {
        let (engine, store, catalog, _) = cart_engine();
        catalog.upsert(ProductInfo {
            is_available: false,
            ..product(3, "Tiramisu", dec!(6.00))
        });

        let txn = store.begin_write().unwrap();
        let err = engine
            .add_item_txn(&txn, 5, &CustomerRef::anonymous(), 3, 1, None)
            .unwrap_err();
        txn.commit().unwrap();
        assert!(matches!(
            err,
            CoreError::ProductUnavailable { product_id: 3, .. }
        ));
    }

    #[test]
    fn duplicate_pending_orders_collapse_into_the_earliest() {
        let (engine, store, _, sink) = cart_engine();
        let now = chrono::Utc::now();

        let txn = store.begin_write().unwrap();
        let mut first = Order::new_pending("202601010001".into(), 5, CustomerRef::anonymous(), now);
        first.items.push(LineItem::new(1, 1, dec!(2.50), now));
        let mut second = Order::new_pending(
            "202601010002".into(),
            5,
            CustomerRef::anonymous(),
            now + chrono::Duration::seconds(1),
        );
        second.items.push(LineItem::new(2, 1, dec!(11.00), now));
        store.put_order(&txn, &first).unwrap();
        store.put_order(&txn, &second).unwrap();
        txn.commit().unwrap();

        let order = add(&engine, &store, 5, 1, 2);

        assert_eq!(order.id, first.id);
        assert_eq!(order.items.len(), 2);
        assert_eq!(
            store.get_order(&second.id).unwrap().unwrap().status,
            OrderStatus::Cancelled
        );
        assert_eq!(sink.count(AuditAction::DuplicateOrdersMerged), 1);
    }

    #[test]
    fn duplicate_line_items_are_merged_before_mutation() {
        let (engine, store, _, sink) = cart_engine();
        let now = chrono::Utc::now();

        let txn = store.begin_write().unwrap();
        let mut order = Order::new_pending("202601010001".into(), 5, CustomerRef::anonymous(), now);
        order.items.push(LineItem::new(1, 2, dec!(2.50), now));
        order.items.push(LineItem::new(1, 3, dec!(2.50), now));
        store.put_order(&txn, &order).unwrap();
        txn.commit().unwrap();

        let repaired = add(&engine, &store, 5, 2, 1);

        let espresso = repaired.items.iter().find(|i| i.product_id == 1).unwrap();
        assert_eq!(espresso.quantity, 5);
        assert_eq!(sink.count(AuditAction::DuplicateItemsMerged), 1);
    }

    #[test]
    fn zero_quantity_update_removes_the_row() {
        let (engine, store, _, _) = cart_engine();
        let order = add(&engine, &store, 5, 1, 2);
        let item_id = order.items[0].id.clone();

        let txn = store.begin_write().unwrap();
        let order = engine
            .update_item_txn(&txn, 5, &item_id, Some(0), None)
            .unwrap();
        txn.commit().unwrap();

        assert!(order.items.is_empty());
        assert_eq!(order.total_amount, Decimal::ZERO);
    }

    #[test]
    fn items_of_another_table_are_off_limits() {
        let (engine, store, _, _) = cart_engine();
        let order = add(&engine, &store, 5, 1, 2);
        let item_id = order.items[0].id.clone();

        let txn = store.begin_write().unwrap();
        let err = engine.remove_item_txn(&txn, 6, &item_id).unwrap_err();
        txn.commit().unwrap();
        assert!(matches!(err, CoreError::Unauthorized(_)));
    }

    #[test]
    fn discard_keeps_the_order_row_and_audits_once() {
        let (engine, store, _, sink) = cart_engine();
        let order = add(&engine, &store, 5, 1, 2);

        let txn = store.begin_write().unwrap();
        let discarded = engine.discard_txn(&txn, 5).unwrap();
        txn.commit().unwrap();
        assert_eq!(discarded, vec![(order.id.clone(), 1)]);

        let kept = store.get_order(&order.id).unwrap().unwrap();
        assert!(kept.items.is_empty());
        assert_eq!(kept.final_amount, Decimal::ZERO);
        assert_eq!(kept.status, OrderStatus::Pending);

        // Discarding an already-empty cart is silent.
        let txn = store.begin_write().unwrap();
        assert!(engine.discard_txn(&txn, 5).unwrap().is_empty());
        txn.commit().unwrap();
        assert_eq!(sink.count(AuditAction::CartDiscarded), 1);
    }

    #[test]
    fn submit_confirms_and_is_idempotent_by_order_id() {
        let (engine, store, _, sink) = cart_engine();
        add(&engine, &store, 5, 1, 2);

        let txn = store.begin_write().unwrap();
        let (order, confirmed) = engine
            .submit_txn(&txn, 5, &SubmitPayload::default())
            .unwrap();
        txn.commit().unwrap();
        assert!(confirmed);
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.final_amount, dec!(5.00));

        let retry = SubmitPayload {
            order_id: Some(order.id.clone()),
            ..Default::default()
        };
        let txn = store.begin_write().unwrap();
        let (again, confirmed) = engine.submit_txn(&txn, 5, &retry).unwrap();
        txn.commit().unwrap();
        assert!(!confirmed);
        assert_eq!(again.id, order.id);
        assert_eq!(sink.count(AuditAction::OrderConfirmed), 1);
    }

    #[test]
    fn submitting_an_empty_cart_is_rejected() {
        let (engine, store, _, _) = cart_engine();
        let txn = store.begin_write().unwrap();
        let err = engine
            .submit_txn(&txn, 5, &SubmitPayload::default())
            .unwrap_err();
        txn.commit().unwrap();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn submit_payload_items_rebuild_the_cart() {
        let (engine, store, _, _) = cart_engine();
        add(&engine, &store, 5, 1, 2);

        let payload = SubmitPayload {
            items: vec![
                crate::lifecycle::SubmitItem {
                    product_id: 1,
                    quantity: 1,
                    price: None,
                    notes: None,
                },
                crate::lifecycle::SubmitItem {
                    product_id: 2,
                    quantity: 2,
                    price: None,
                    notes: Some("no bacon".into()),
                },
            ],
            ..Default::default()
        };
        let txn = store.begin_write().unwrap();
        let (order, _) = engine.submit_txn(&txn, 5, &payload).unwrap();
        txn.commit().unwrap();

        assert_eq!(order.items.len(), 2);
        assert_eq!(order.final_amount, dec!(24.50));
        assert_eq!(order.items[1].notes, "no bacon");
    }

    #[test]
    fn submit_payload_prices_beat_catalog_and_captured_prices() {
        let (engine, store, _, _) = cart_engine();
        // Captured at the catalog price of 2.50.
        add(&engine, &store, 5, 1, 1);

        let payload = SubmitPayload {
            items: vec![
                crate::lifecycle::SubmitItem {
                    product_id: 1,
                    quantity: 2,
                    price: Some(dec!(2.00)),
                    notes: None,
                },
                crate::lifecycle::SubmitItem {
                    product_id: 2,
                    quantity: 1,
                    price: Some(dec!(9.99)),
                    notes: None,
                },
            ],
            ..Default::default()
        };
        let txn = store.begin_write().unwrap();
        let (order, _) = engine.submit_txn(&txn, 5, &payload).unwrap();
        txn.commit().unwrap();

        assert_eq!(order.items[0].price, dec!(2.00));
        assert_eq!(order.items[1].price, dec!(9.99));
        assert_eq!(order.final_amount, dec!(13.99));
    }
}
