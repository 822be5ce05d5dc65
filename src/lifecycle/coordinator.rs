//! Lifecycle coordinator.
//!
//! Single entry point for everything that moves a table session through its
//! life: QR access, token validation, cart mutations, submission, staff
//! overrides and expiry cleanup. The coordinator is the only place where
//! session fate and cart fate are tied together, always inside one write
//! transaction per operation, under a per-table async lock.
//!
//! Completed transitions are published on a broadcast channel; who listens
//! (dashboards, kitchen displays, push gateways) is not this module's
//! business.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redb::WriteTransaction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::catalog::Catalog;
use crate::db::{CustomerRef, LineItem, Order, OrderStatus, Store, TableSession};
use crate::lifecycle::{
    CartEngine, CoreError, CoreResult, LifecycleEvent, SessionStore, TableRegistry,
};
use crate::utils::Clock;

/// Tunables for the session lifecycle.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Absolute session TTL, counted from creation.
    pub session_ttl: chrono::Duration,
    /// Window before `expires_at` in which validation flags `expiring_soon`.
    pub warn_window: chrono::Duration,
    /// How long an operation waits for the per-table lock before giving up.
    pub lock_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            session_ttl: chrono::Duration::minutes(12),
            warn_window: chrono::Duration::minutes(2),
            lock_timeout: Duration::from_secs(3),
        }
    }
}

/// One line of a submit payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitItem {
    pub product_id: u32,
    pub quantity: u32,
    /// Unit price as the client captured it. When omitted, the price
    /// already snapshotted in the cart (or the catalog, for a new row)
    /// applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Submit request. An empty `items` list means "submit the cart as stored";
/// a non-empty list is authoritative and rebuilds the cart first.
/// `order_id` makes retries idempotent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<SubmitItem>,
}

/// Query filter for session listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFilter {
    pub table: Option<u32>,
    #[serde(default)]
    pub active_only: bool,
}

/// Outcome of a token check. Always a value, never an error: an unknown or
/// lapsed token is an ordinary answer for the client, not a fault.
#[derive(Debug, Clone, Serialize)]
pub struct TokenValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<i64>,
    pub expiring_soon: bool,
    pub order_submitted: bool,
    /// Whether the table currently has a non-terminal order.
    pub occupied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TokenValidation {
    fn denied(reason: &str) -> Self {
        Self {
            valid: false,
            table: None,
            token: None,
            expires_at: None,
            remaining_secs: None,
            expiring_soon: false,
            order_submitted: false,
            occupied: false,
            current_order_id: None,
            reason: Some(reason.to_string()),
        }
    }
}

/// Client-facing view of a table's cart.
#[derive(Debug, Clone, Serialize)]
pub struct CartSummary {
    pub table: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    pub items: Vec<LineItem>,
    pub item_count: u32,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

impl CartSummary {
    fn from_order(table: u32, order: Option<Order>) -> Self {
        match order {
            Some(order) => Self {
                table,
                order_id: Some(order.id),
                order_number: Some(order.order_number),
                item_count: order.items.iter().map(|i| i.quantity).sum(),
                total_amount: order.total_amount,
                discount_amount: order.discount_amount,
                final_amount: order.final_amount,
                items: order.items,
            },
            None => Self {
                table,
                order_id: None,
                order_number: None,
                items: Vec::new(),
                item_count: 0,
                total_amount: Decimal::ZERO,
                discount_amount: Decimal::ZERO,
                final_amount: Decimal::ZERO,
            },
        }
    }
}

pub struct LifecycleCoordinator {
    store: Store,
    registry: TableRegistry,
    sessions: SessionStore,
    cart: CartEngine,
    audit: Arc<dyn AuditSink>,
    clock: Clock,
    config: LifecycleConfig,
    /// Per-table critical sections. Entries are created on first use and
    /// never removed; a restaurant has a bounded number of tables.
    locks: DashMap<u32, Arc<Mutex<()>>>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleCoordinator {
    pub fn new(
        store: Store,
        catalog: Arc<dyn Catalog>,
        audit: Arc<dyn AuditSink>,
        clock: Clock,
        config: LifecycleConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            registry: TableRegistry::new(store.clone(), audit.clone(), clock.clone()),
            sessions: SessionStore::new(
                store.clone(),
                audit.clone(),
                clock.clone(),
                config.session_ttl,
            ),
            cart: CartEngine::new(store.clone(), catalog, audit.clone(), clock.clone()),
            store,
            audit,
            clock,
            config,
            locks: DashMap::new(),
            events,
        }
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Customer scans the table's QR code. Every scan hands over the
    /// table: prior sessions are ended and their carts discarded, every
    /// open order (confirmed included) is cancelled, and a fresh token is
    /// minted with a full TTL. A new party never inherits the previous
    /// occupant's session, cart or orders.
    pub async fn access_table(&self, table: u32) -> CoreResult<TokenValidation> {
        let table_row = self.registry.get(table)?;
        if !table_row.is_active {
            return Err(CoreError::TableInactive(table));
        }
        let _guard = self.lock_table(table).await?;
        let now = self.clock.now();

        let txn = self.store.begin_write()?;
        let mut pending_events = Vec::new();

        for prior in self.store.active_sessions_for_table_txn(&txn, table)? {
            let expired = prior.is_expired(now);
            if self.sessions.deactivate_txn(&txn, &prior, expired, None)? {
                pending_events.push(if expired {
                    LifecycleEvent::SessionExpired {
                        table,
                        token: prior.token.clone(),
                    }
                } else {
                    LifecycleEvent::SessionDeactivated {
                        table,
                        token: prior.token.clone(),
                    }
                });
            }
        }
        let discarded = self.cart.discard_txn(&txn, table)?;
        let cancelled = self.registry.cancel_open_orders(&txn, table, None)?;
        self.queue_cleanup_events(&mut pending_events, table, discarded, cancelled);

        let (session, _) = self.sessions.create_txn(&txn, table)?;
        pending_events.push(LifecycleEvent::SessionOpened {
            table,
            token: session.token.clone(),
            expires_at: session.expires_at,
        });
        txn.commit().map_err(crate::db::StorageError::from)?;

        self.audit.record(
            AuditEvent::new(AuditAction::TableAccessed, &self.clock)
                .table(table)
                .session(session.token.clone()),
        );
        self.publish_all(pending_events);
        info!(table, token = %session.token, "table accessed");
        self.validation_for(&session, now)
    }

    /// Check a token. Lazy expiry runs here: a lapsed session is
    /// deactivated, its cart discarded and its pending order cancelled
    /// before the "not valid" answer goes out.
    pub async fn validate_token(&self, token: &str) -> CoreResult<TokenValidation> {
        let Some(session) = self.store.get_session(token)? else {
            return Ok(TokenValidation::denied("session not found"));
        };
        let _guard = self.lock_table(session.table).await?;
        let txn = self.store.begin_write()?;
        let was_active = self
            .store
            .get_session_txn(&txn, token)?
            .is_some_and(|s| s.is_active);

        match self.sessions.validate_txn(&txn, token) {
            Ok(session) => {
                txn.commit().map_err(crate::db::StorageError::from)?;
                self.validation_for(&session, self.clock.now())
            }
            Err(CoreError::SessionExpired) => {
                self.finish_expiry(txn, &session, was_active)?;
                let mut denied = TokenValidation::denied("session expired");
                denied.table = Some(session.table);
                denied.token = Some(session.token.clone());
                denied.order_submitted = session.order_submitted;
                Ok(denied)
            }
            Err(CoreError::SessionInvalid) => Ok(TokenValidation::denied("session deactivated")),
            Err(err) => Err(err),
        }
    }

    /// Set the quantity for a product in the session's cart.
    pub async fn add_item(
        &self,
        token: &str,
        customer: CustomerRef,
        product_id: u32,
        quantity: u32,
        notes: Option<String>,
    ) -> CoreResult<CartSummary> {
        let (session, _guard) = self.lock_session(token).await?;
        let txn = self.store.begin_write()?;
        let session = match self.guard_session_txn(&txn, token) {
            Ok(session) => session,
            Err(fail) => return self.expire_and_fail(txn, &session, fail),
        };
        let order = self.cart.add_item_txn(
            &txn,
            session.table,
            &customer,
            product_id,
            quantity,
            notes.as_deref(),
        )?;
        txn.commit().map_err(crate::db::StorageError::from)?;
        Ok(CartSummary::from_order(session.table, Some(order)))
    }

    /// Change a line item's quantity and/or notes; quantity zero removes it.
    pub async fn update_item(
        &self,
        token: &str,
        item_id: &str,
        quantity: Option<u32>,
        notes: Option<String>,
    ) -> CoreResult<CartSummary> {
        let (session, _guard) = self.lock_session(token).await?;
        let txn = self.store.begin_write()?;
        let session = match self.guard_session_txn(&txn, token) {
            Ok(session) => session,
            Err(fail) => return self.expire_and_fail(txn, &session, fail),
        };
        let order =
            self.cart
                .update_item_txn(&txn, session.table, item_id, quantity, notes.as_deref())?;
        txn.commit().map_err(crate::db::StorageError::from)?;
        Ok(CartSummary::from_order(session.table, Some(order)))
    }

    /// Remove a line item from the session's cart.
    pub async fn remove_item(&self, token: &str, item_id: &str) -> CoreResult<CartSummary> {
        let (session, _guard) = self.lock_session(token).await?;
        let txn = self.store.begin_write()?;
        let session = match self.guard_session_txn(&txn, token) {
            Ok(session) => session,
            Err(fail) => return self.expire_and_fail(txn, &session, fail),
        };
        let order = self.cart.remove_item_txn(&txn, session.table, item_id)?;
        txn.commit().map_err(crate::db::StorageError::from)?;
        Ok(CartSummary::from_order(session.table, Some(order)))
    }

    /// Current cart contents for the session's table.
    pub async fn view_cart(&self, token: &str) -> CoreResult<CartSummary> {
        let (session, _guard) = self.lock_session(token).await?;
        let txn = self.store.begin_write()?;
        let session = match self.guard_session_txn(&txn, token) {
            Ok(session) => session,
            Err(fail) => return self.expire_and_fail(txn, &session, fail),
        };
        txn.commit().map_err(crate::db::StorageError::from)?;
        let order = self.cart.current_cart(session.table)?;
        Ok(CartSummary::from_order(session.table, order))
    }

    /// Total item quantity in the session's cart.
    pub async fn cart_count(&self, token: &str) -> CoreResult<u32> {
        Ok(self.view_cart(token).await?.item_count)
    }

    /// Confirm the session's cart as a real order. The session stays active
    /// (flagged `order_submitted`) so the customer can keep checking on it.
    pub async fn submit(&self, token: &str, payload: SubmitPayload) -> CoreResult<Order> {
        let (session, _guard) = self.lock_session(token).await?;
        let txn = self.store.begin_write()?;
        let session = match self.guard_session_txn(&txn, token) {
            Ok(session) => session,
            Err(fail) => return self.expire_and_fail(txn, &session, fail),
        };
        let (order, confirmed) = self.cart.submit_txn(&txn, session.table, &payload)?;
        if confirmed {
            self.sessions.mark_submitted_txn(&txn, token)?;
        }
        txn.commit().map_err(crate::db::StorageError::from)?;
        if confirmed {
            self.publish(LifecycleEvent::OrderConfirmed {
                table: order.table,
                order_id: order.id.clone(),
                order_number: order.order_number.clone(),
                final_amount: order.final_amount,
            });
            info!(table = order.table, order_number = %order.order_number, "order confirmed");
        }
        Ok(order)
    }

    /// Staff override: end a session now, discarding its cart and
    /// cancelling its pending order. Idempotent.
    pub async fn deactivate_session(
        &self,
        token: &str,
        operator: Option<&str>,
    ) -> CoreResult<()> {
        let (session, _guard) = self.lock_session(token).await?;
        let txn = self.store.begin_write()?;
        let flipped = self
            .sessions
            .deactivate_txn(&txn, &session, false, operator)?;
        let discarded = self.cart.discard_txn(&txn, session.table)?;
        let cancelled = self.registry.cancel_pending_orders(&txn, session.table)?;
        txn.commit().map_err(crate::db::StorageError::from)?;

        let mut pending_events = Vec::new();
        if flipped {
            pending_events.push(LifecycleEvent::SessionDeactivated {
                table: session.table,
                token: session.token.clone(),
            });
        }
        self.queue_cleanup_events(&mut pending_events, session.table, discarded, cancelled);
        self.publish_all(pending_events);
        Ok(())
    }

    /// Staff override: clear a table completely. Every session is
    /// deactivated and every non-terminal order (pending or already
    /// confirmed) is cancelled. Returns the number of cancelled orders.
    pub async fn free_table(&self, table: u32, operator: Option<&str>) -> CoreResult<usize> {
        self.registry.get(table)?;
        let _guard = self.lock_table(table).await?;
        let txn = self.store.begin_write()?;

        let mut ended_tokens = Vec::new();
        for session in self.store.active_sessions_for_table_txn(&txn, table)? {
            if self.sessions.deactivate_txn(&txn, &session, false, operator)? {
                ended_tokens.push(session.token);
            }
        }
        let discarded = self.cart.discard_txn(&txn, table)?;
        let cancelled = self.registry.cancel_open_orders(&txn, table, operator)?;
        txn.commit().map_err(crate::db::StorageError::from)?;

        let mut event = AuditEvent::new(AuditAction::TableFreed, &self.clock)
            .table(table)
            .details(serde_json::json!({ "cancelled_orders": cancelled.len() }));
        if let Some(op) = operator {
            event = event.operator(op);
        }
        self.audit.record(event);

        let mut pending_events: Vec<LifecycleEvent> = ended_tokens
            .into_iter()
            .map(|token| LifecycleEvent::SessionDeactivated { table, token })
            .collect();
        self.queue_cleanup_events(&mut pending_events, table, discarded, cancelled.clone());
        pending_events.push(LifecycleEvent::TableFreed {
            table,
            cancelled_orders: cancelled.len(),
        });
        self.publish_all(pending_events);
        info!(table, cancelled = cancelled.len(), "table freed");
        Ok(cancelled.len())
    }

    /// Free every registered table. End-of-day reset.
    pub async fn free_all_tables(&self, operator: Option<&str>) -> CoreResult<Vec<(u32, usize)>> {
        let mut freed = Vec::new();
        for table in self.registry.list()? {
            let cancelled = self.free_table(table.number, operator).await?;
            freed.push((table.number, cancelled));
        }
        Ok(freed)
    }

    /// Sessions, newest first, per the filter. Read-only.
    pub fn list_sessions(&self, filter: &SessionFilter) -> CoreResult<Vec<TableSession>> {
        self.sessions.list(filter.table, filter.active_only)
    }

    /// One session plus its table's current cart. Read-only; staff can
    /// inspect lapsed sessions without triggering cleanup.
    pub fn session_detail(
        &self,
        token: &str,
    ) -> CoreResult<(TableSession, Option<CartSummary>)> {
        let session = self.sessions.get(token)?;
        let cart = self
            .cart
            .current_cart(session.table)?
            .map(|order| CartSummary::from_order(session.table, Some(order)));
        Ok((session, cart))
    }

    pub fn get_order(&self, order_id: &str) -> CoreResult<Order> {
        self.store
            .get_order(order_id)?
            .ok_or_else(|| CoreError::OrderNotFound(order_id.to_string()))
    }

    /// Staff marks a confirmed order as delivered. Delivery completes the
    /// meal: the table's sessions are ended and any other open order is
    /// cancelled, so the table is immediately free for the next party.
    pub async fn deliver_order(&self, order_id: &str, operator: Option<&str>) -> CoreResult<Order> {
        let before = self.get_order(order_id)?;
        let _guard = self.lock_table(before.table).await?;
        let txn = self.store.begin_write()?;
        let order = self.cart.deliver_txn(&txn, order_id, operator)?;

        let mut pending_events = Vec::new();
        if before.status != OrderStatus::Delivered {
            pending_events.push(LifecycleEvent::OrderDelivered {
                table: order.table,
                order_id: order.id.clone(),
            });
        }
        for session in self.store.active_sessions_for_table_txn(&txn, order.table)? {
            if self.sessions.deactivate_txn(&txn, &session, false, operator)? {
                pending_events.push(LifecycleEvent::SessionDeactivated {
                    table: order.table,
                    token: session.token,
                });
            }
        }
        let discarded = self.cart.discard_txn(&txn, order.table)?;
        let cancelled = self.registry.cancel_open_orders(&txn, order.table, operator)?;
        txn.commit().map_err(crate::db::StorageError::from)?;

        self.queue_cleanup_events(&mut pending_events, order.table, discarded, cancelled);
        self.publish_all(pending_events);
        Ok(order)
    }

    /// Proactively clean up lapsed sessions instead of waiting for the next
    /// probe. Busy tables are skipped and caught on a later pass. Returns
    /// the number of sessions cleaned.
    pub async fn sweep_expired(&self) -> CoreResult<usize> {
        let now = self.clock.now();
        let mut cleaned = 0;
        for session in self.sessions.list(None, true)? {
            if !session.is_expired(now) {
                continue;
            }
            let guard = match self.lock_table(session.table).await {
                Ok(guard) => guard,
                Err(CoreError::ConcurrencyConflict(table)) => {
                    debug!(table, "sweep skipping busy table");
                    continue;
                }
                Err(err) => return Err(err),
            };
            let txn = self.store.begin_write()?;
            let (discarded, cancelled) = self.expire_cleanup_txn(&txn, &session)?;
            txn.commit().map_err(crate::db::StorageError::from)?;
            drop(guard);

            let mut pending_events = vec![LifecycleEvent::SessionExpired {
                table: session.table,
                token: session.token.clone(),
            }];
            self.queue_cleanup_events(&mut pending_events, session.table, discarded, cancelled);
            self.publish_all(pending_events);
            cleaned += 1;
        }
        if cleaned > 0 {
            info!(cleaned, "expiry sweep finished");
        }
        Ok(cleaned)
    }

    // ========== internals ==========

    async fn lock_table(&self, table: u32) -> CoreResult<OwnedMutexGuard<()>> {
        let mutex = self
            .locks
            .entry(table)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        tokio::time::timeout(self.config.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| CoreError::ConcurrencyConflict(table))
    }

    /// Resolve the token's table and take that table's lock. The returned
    /// session is a pre-lock snapshot; callers re-validate inside their
    /// transaction.
    async fn lock_session(
        &self,
        token: &str,
    ) -> CoreResult<(TableSession, OwnedMutexGuard<()>)> {
        let session = self.sessions.get(token)?;
        let guard = self.lock_table(session.table).await?;
        Ok((session, guard))
    }

    /// Validate within the transaction, handing the transaction back on
    /// failure so the caller can finish expiry cleanup before surfacing the
    /// error.
    fn guard_session_txn(
        &self,
        txn: &WriteTransaction,
        token: &str,
    ) -> Result<TableSession, (CoreError, bool)> {
        let was_active = match self.store.get_session_txn(txn, token) {
            Ok(row) => row.is_some_and(|s| s.is_active),
            Err(err) => return Err((CoreError::Storage(err), false)),
        };
        self.sessions
            .validate_txn(txn, token)
            .map_err(|err| (err, was_active))
    }

    /// Finish an expiry discovered mid-operation: commit the cleanup, then
    /// surface the original error.
    fn expire_and_fail<T>(
        &self,
        txn: WriteTransaction,
        session: &TableSession,
        (err, was_active): (CoreError, bool),
    ) -> CoreResult<T> {
        if matches!(err, CoreError::SessionExpired) {
            self.finish_expiry(txn, session, was_active)?;
        }
        // Any other validation failure: drop the transaction, aborting it.
        Err(err)
    }

    /// Cart discard + pending-order cancellation for a session whose TTL
    /// elapsed (the active flag was already flipped by validation).
    fn finish_expiry(
        &self,
        txn: WriteTransaction,
        session: &TableSession,
        was_active: bool,
    ) -> CoreResult<()> {
        let discarded = self.cart.discard_txn(&txn, session.table)?;
        let cancelled = self.registry.cancel_pending_orders(&txn, session.table)?;
        txn.commit().map_err(crate::db::StorageError::from)?;

        let mut pending_events = Vec::new();
        if was_active {
            pending_events.push(LifecycleEvent::SessionExpired {
                table: session.table,
                token: session.token.clone(),
            });
        }
        self.queue_cleanup_events(&mut pending_events, session.table, discarded, cancelled);
        self.publish_all(pending_events);
        Ok(())
    }

    /// Full expiry cleanup within the caller's transaction; returns what
    /// was discarded and cancelled so events can go out after commit.
    fn expire_cleanup_txn(
        &self,
        txn: &WriteTransaction,
        session: &TableSession,
    ) -> CoreResult<(Vec<(String, usize)>, Vec<Order>)> {
        self.sessions.deactivate_txn(txn, session, true, None)?;
        let discarded = self.cart.discard_txn(txn, session.table)?;
        let cancelled = self.registry.cancel_pending_orders(txn, session.table)?;
        Ok((discarded, cancelled))
    }

    fn queue_cleanup_events(
        &self,
        pending_events: &mut Vec<LifecycleEvent>,
        table: u32,
        discarded: Vec<(String, usize)>,
        cancelled: Vec<Order>,
    ) {
        for (order_id, items_removed) in discarded {
            pending_events.push(LifecycleEvent::CartDiscarded {
                table,
                order_id,
                items_removed,
            });
        }
        for order in cancelled {
            pending_events.push(LifecycleEvent::OrderCancelled {
                table,
                order_id: order.id,
            });
        }
    }

    fn validation_for(
        &self,
        session: &TableSession,
        now: DateTime<Utc>,
    ) -> CoreResult<TokenValidation> {
        let usable = session.is_usable(now);
        let current_order = self.registry.current_order(session.table)?;
        Ok(TokenValidation {
            valid: usable,
            table: Some(session.table),
            token: Some(session.token.clone()),
            expires_at: Some(session.expires_at),
            remaining_secs: Some(session.remaining_secs(now)),
            expiring_soon: usable && (session.expires_at - now) <= self.config.warn_window,
            order_submitted: session.order_submitted,
            occupied: current_order.is_some(),
            current_order_id: current_order.map(|o| o.id),
            reason: None,
        })
    }

    fn publish(&self, event: LifecycleEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_all(&self, events: Vec<LifecycleEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordingSink;
    use crate::catalog::{ProductCatalog, ProductInfo};
    use crate::db::TableCreate;
    use rust_decimal_macros::dec;

    struct Harness {
        coordinator: LifecycleCoordinator,
        sink: Arc<RecordingSink>,
        clock: Clock,
    }

    fn harness() -> Harness {
        harness_with(LifecycleConfig::default())
    }

    fn harness_with(config: LifecycleConfig) -> Harness {
        let store = Store::open_in_memory().unwrap();
        let catalog = ProductCatalog::new();
        catalog.upsert(ProductInfo {
            id: 1,
            name: "Espresso".into(),
            price: dec!(2.50),
            is_active: true,
            is_available: true,
        });
        catalog.upsert(ProductInfo {
            id: 2,
            name: "Carbonara".into(),
            price: dec!(11.00),
            is_active: true,
            is_available: true,
        });
        let sink = RecordingSink::new();
        let clock = Clock::system();
        let coordinator =
            LifecycleCoordinator::new(store, catalog, sink.clone(), clock.clone(), config);
        coordinator
            .registry()
            .create(TableCreate {
                number: 5,
                seats: Some(4),
            })
            .unwrap();
        Harness {
            coordinator,
            sink,
            clock,
        }
    }

    async fn open_session(h: &Harness, table: u32) -> String {
        h.coordinator
            .access_table(table)
            .await
            .unwrap()
            .token
            .unwrap()
    }

    #[tokio::test]
    async fn scan_order_submit_happy_path() {
        let h = harness();
        let token = open_session(&h, 5).await;

        h.coordinator
            .add_item(&token, CustomerRef::anonymous(), 1, 2, None)
            .await
            .unwrap();
        let cart = h
            .coordinator
            .add_item(&token, CustomerRef::anonymous(), 2, 1, Some("extra cheese".into()))
            .await
            .unwrap();
        assert_eq!(cart.item_count, 3);
        assert_eq!(cart.final_amount, dec!(16.00));

        let order = h
            .coordinator
            .submit(&token, SubmitPayload::default())
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);

        // Session survives submission, flagged so the UI can show the order.
        let validation = h.coordinator.validate_token(&token).await.unwrap();
        assert!(validation.valid);
        assert!(validation.order_submitted);
        assert!(validation.occupied);
        assert_eq!(validation.current_order_id.as_deref(), Some(order.id.as_str()));
        assert!(h.coordinator.registry().is_occupied(5).unwrap());
    }

    #[tokio::test]
    async fn lapsed_session_is_cleaned_up_exactly_once() {
        let h = harness();
        let token = open_session(&h, 5).await;
        let cart = h
            .coordinator
            .add_item(&token, CustomerRef::anonymous(), 1, 2, None)
            .await
            .unwrap();
        let order_id = cart.order_id.unwrap();

        h.clock.advance(chrono::Duration::minutes(13));

        let validation = h.coordinator.validate_token(&token).await.unwrap();
        assert!(!validation.valid);
        assert_eq!(validation.reason.as_deref(), Some("session expired"));

        let order = h.coordinator.get_order(&order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.items.is_empty());
        assert!(!h.coordinator.registry().is_occupied(5).unwrap());

        // Probing again repeats the answer without repeating the cleanup.
        let again = h.coordinator.validate_token(&token).await.unwrap();
        assert!(!again.valid);
        assert_eq!(h.sink.count(AuditAction::SessionExpired), 1);
        assert_eq!(h.sink.count(AuditAction::CartDiscarded), 1);
        assert_eq!(h.sink.count(AuditAction::OrderCancelled), 1);
    }

    #[tokio::test]
    async fn expired_session_cannot_mutate_the_cart() {
        let h = harness();
        let token = open_session(&h, 5).await;
        h.coordinator
            .add_item(&token, CustomerRef::anonymous(), 1, 1, None)
            .await
            .unwrap();

        h.clock.advance(chrono::Duration::minutes(13));

        let err = h
            .coordinator
            .add_item(&token, CustomerRef::anonymous(), 2, 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SessionExpired));
        // The failed mutation still completed the cleanup.
        assert_eq!(h.sink.count(AuditAction::CartDiscarded), 1);
    }

    #[tokio::test]
    async fn validation_warns_close_to_the_deadline() {
        let h = harness();
        let token = open_session(&h, 5).await;

        let fresh = h.coordinator.validate_token(&token).await.unwrap();
        assert!(fresh.valid);
        assert!(!fresh.expiring_soon);

        h.clock.advance(chrono::Duration::minutes(10) + chrono::Duration::seconds(30));
        let close = h.coordinator.validate_token(&token).await.unwrap();
        assert!(close.valid);
        assert!(close.expiring_soon);
        assert!(close.remaining_secs.unwrap() <= 120);
    }

    #[tokio::test]
    async fn every_scan_hands_the_table_over() {
        let h = harness();
        let first = open_session(&h, 5).await;
        h.coordinator
            .add_item(&first, CustomerRef::anonymous(), 1, 2, None)
            .await
            .unwrap();

        // A second scan is a new party, not a rejoin.
        let second = open_session(&h, 5).await;
        assert_ne!(second, first);

        let old = h.coordinator.validate_token(&first).await.unwrap();
        assert!(!old.valid);
        assert_eq!(old.reason.as_deref(), Some("session deactivated"));

        let cart = h.coordinator.view_cart(&second).await.unwrap();
        assert_eq!(cart.item_count, 0);
        assert_eq!(h.sink.count(AuditAction::SessionDeactivated), 1);
        assert_eq!(h.sink.count(AuditAction::CartDiscarded), 1);
    }

    #[tokio::test]
    async fn a_scan_cancels_the_prior_customers_confirmed_order() {
        let h = harness();
        let first = open_session(&h, 5).await;
        h.coordinator
            .add_item(&first, CustomerRef::anonymous(), 1, 1, None)
            .await
            .unwrap();
        let order = h
            .coordinator
            .submit(&first, SubmitPayload::default())
            .await
            .unwrap();

        let grant = h.coordinator.access_table(5).await.unwrap();
        assert_eq!(
            h.coordinator.get_order(&order.id).unwrap().status,
            OrderStatus::Cancelled
        );
        // The fresh session starts on an unoccupied table.
        assert!(!grant.occupied);
        assert!(!h.coordinator.registry().is_occupied(5).unwrap());
    }

    #[tokio::test]
    async fn scanning_after_a_lapse_finishes_the_expiry_first() {
        let h = harness();
        let first = open_session(&h, 5).await;
        h.clock.advance(chrono::Duration::minutes(13));

        let third = open_session(&h, 5).await;
        assert_ne!(third, first);

        // The lapsed session was expired, not merely displaced.
        assert_eq!(h.sink.count(AuditAction::SessionExpired), 1);
        assert_eq!(h.sink.count(AuditAction::SessionDeactivated), 0);
        let validation = h.coordinator.validate_token(&third).await.unwrap();
        assert!(validation.valid);
    }

    #[tokio::test]
    async fn staff_deactivation_ends_the_session_and_cancels_the_cart() {
        let h = harness();
        let token = open_session(&h, 5).await;
        let cart = h
            .coordinator
            .add_item(&token, CustomerRef::anonymous(), 1, 2, None)
            .await
            .unwrap();
        let order_id = cart.order_id.unwrap();

        h.coordinator
            .deactivate_session(&token, Some("staff-1"))
            .await
            .unwrap();

        let validation = h.coordinator.validate_token(&token).await.unwrap();
        assert!(!validation.valid);
        assert_eq!(validation.reason.as_deref(), Some("session deactivated"));
        assert_eq!(
            h.coordinator.get_order(&order_id).unwrap().status,
            OrderStatus::Cancelled
        );

        // Second deactivation is a no-op.
        h.coordinator
            .deactivate_session(&token, Some("staff-1"))
            .await
            .unwrap();
        assert_eq!(h.sink.count(AuditAction::SessionDeactivated), 1);

        // The table is immediately reusable.
        let fresh = open_session(&h, 5).await;
        assert_ne!(fresh, token);
    }

    #[tokio::test]
    async fn freeing_a_table_cancels_confirmed_orders_too() {
        let h = harness();
        let token = open_session(&h, 5).await;
        h.coordinator
            .add_item(&token, CustomerRef::anonymous(), 1, 2, None)
            .await
            .unwrap();
        let order = h
            .coordinator
            .submit(&token, SubmitPayload::default())
            .await
            .unwrap();
        assert!(h.coordinator.registry().is_occupied(5).unwrap());

        let cancelled = h.coordinator.free_table(5, Some("staff-1")).await.unwrap();
        assert_eq!(cancelled, 1);
        assert_eq!(
            h.coordinator.get_order(&order.id).unwrap().status,
            OrderStatus::Cancelled
        );
        assert!(!h.coordinator.registry().is_occupied(5).unwrap());

        let validation = h.coordinator.validate_token(&token).await.unwrap();
        assert!(!validation.valid);
    }

    #[tokio::test]
    async fn delivery_completes_the_meal_and_frees_the_table() {
        let h = harness();
        let token = open_session(&h, 5).await;
        h.coordinator
            .add_item(&token, CustomerRef::anonymous(), 1, 2, None)
            .await
            .unwrap();
        let order = h
            .coordinator
            .submit(&token, SubmitPayload::default())
            .await
            .unwrap();

        let delivered = h
            .coordinator
            .deliver_order(&order.id, Some("waiter-2"))
            .await
            .unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert!(!h.coordinator.registry().is_occupied(5).unwrap());

        // The customer's session ended with the meal.
        let validation = h.coordinator.validate_token(&token).await.unwrap();
        assert!(!validation.valid);
        assert_eq!(h.sink.count(AuditAction::SessionDeactivated), 1);

        // A delivery retry has nothing left to end.
        h.coordinator
            .deliver_order(&order.id, Some("waiter-2"))
            .await
            .unwrap();
        assert_eq!(h.sink.count(AuditAction::SessionDeactivated), 1);
    }

    #[tokio::test]
    async fn concurrent_cart_mutations_serialize_per_table() {
        let h = harness();
        let token = open_session(&h, 5).await;

        let (a, b) = tokio::join!(
            h.coordinator
                .add_item(&token, CustomerRef::anonymous(), 1, 2, None),
            h.coordinator
                .add_item(&token, CustomerRef::anonymous(), 2, 3, None),
        );
        a.unwrap();
        b.unwrap();

        let cart = h.coordinator.view_cart(&token).await.unwrap();
        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.item_count, 5);

        // Racing the same product still ends on one row holding one of the
        // two requested quantities.
        let (a, b) = tokio::join!(
            h.coordinator
                .add_item(&token, CustomerRef::anonymous(), 1, 4, None),
            h.coordinator
                .add_item(&token, CustomerRef::anonymous(), 1, 7, None),
        );
        a.unwrap();
        b.unwrap();
        let cart = h.coordinator.view_cart(&token).await.unwrap();
        let row = cart.items.iter().find(|i| i.product_id == 1).unwrap();
        assert!(row.quantity == 4 || row.quantity == 7);

        // Everything landed in the one pending order.
        let pending = h
            .coordinator
            .store
            .orders_for_table(5)
            .unwrap()
            .into_iter()
            .filter(|o| o.status == OrderStatus::Pending)
            .count();
        assert_eq!(pending, 1);
    }

    #[tokio::test]
    async fn held_table_lock_surfaces_a_conflict() {
        let config = LifecycleConfig {
            lock_timeout: Duration::from_millis(50),
            ..LifecycleConfig::default()
        };
        let h = harness_with(config);
        let token = open_session(&h, 5).await;

        let _held = h.coordinator.lock_table(5).await.unwrap();
        let err = h
            .coordinator
            .add_item(&token, CustomerRef::anonymous(), 1, 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ConcurrencyConflict(5)));

        // Locks are keyed per table; another table is not held up.
        h.coordinator
            .registry()
            .create(TableCreate {
                number: 6,
                seats: None,
            })
            .unwrap();
        let other = open_session(&h, 6).await;
        h.coordinator
            .add_item(&other, CustomerRef::anonymous(), 1, 1, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sweep_cleans_every_lapsed_session() {
        let h = harness();
        h.coordinator
            .registry()
            .create(TableCreate {
                number: 6,
                seats: None,
            })
            .unwrap();
        let first = open_session(&h, 5).await;
        let second = open_session(&h, 6).await;
        h.coordinator
            .add_item(&first, CustomerRef::anonymous(), 1, 1, None)
            .await
            .unwrap();

        h.clock.advance(chrono::Duration::minutes(13));
        let cleaned = h.coordinator.sweep_expired().await.unwrap();
        assert_eq!(cleaned, 2);

        for token in [first, second] {
            let validation = h.coordinator.validate_token(&token).await.unwrap();
            assert!(!validation.valid);
        }
        assert_eq!(h.sink.count(AuditAction::SessionExpired), 2);

        // Nothing left for a second pass.
        assert_eq!(h.coordinator.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transitions_are_broadcast() {
        let h = harness();
        let mut events = h.coordinator.subscribe();

        let token = open_session(&h, 5).await;
        h.coordinator
            .add_item(&token, CustomerRef::anonymous(), 1, 1, None)
            .await
            .unwrap();
        h.coordinator
            .submit(&token, SubmitPayload::default())
            .await
            .unwrap();

        assert!(matches!(
            events.try_recv().unwrap(),
            LifecycleEvent::SessionOpened { table: 5, .. }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            LifecycleEvent::OrderConfirmed { table: 5, .. }
        ));
    }

    #[tokio::test]
    async fn unknown_token_is_an_answer_not_an_error() {
        let h = harness();
        let validation = h.coordinator.validate_token("nope").await.unwrap();
        assert!(!validation.valid);
        assert_eq!(validation.reason.as_deref(), Some("session not found"));
    }

    #[tokio::test]
    async fn inactive_table_refuses_access() {
        let h = harness();
        h.coordinator
            .registry()
            .update(
                5,
                crate::db::TableUpdate {
                    seats: None,
                    is_active: Some(false),
                },
            )
            .unwrap();
        let err = h.coordinator.access_table(5).await.unwrap_err();
        assert!(matches!(err, CoreError::TableInactive(5)));
    }
}
