//! Audit sink collaborator.
//!
//! Lifecycle transitions emit [`AuditEvent`]s through an [`AuditSink`].
//! Recording is fire-and-forget: a sink failure must never roll back the
//! cart or session mutation that produced the event, so `record` is
//! infallible from the caller's point of view.
//!
//! The default [`AuditLogger`] forwards events over an unbounded channel to
//! a background worker that writes structured log lines. [`RecordingSink`]
//! keeps events in memory; tests use it to assert exactly-once cleanup and
//! invariant-repair observability.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::utils::Clock;

/// Audit action types (enum, not free text).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // ═══ Tables ═══
    TableAccessed,
    TableFreed,
    TableCreated,
    TableUpdated,
    TableDeleted,

    // ═══ Sessions ═══
    SessionCreated,
    SessionExpired,
    SessionDeactivated,

    // ═══ Cart / orders ═══
    CartDiscarded,
    OrderConfirmed,
    OrderCancelled,
    OrderDelivered,

    // ═══ Invariant repair (logged, never surfaced to the caller) ═══
    DuplicateOrdersMerged,
    DuplicateItemsMerged,
}

/// A single audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, clock: &Clock) -> Self {
        Self {
            action,
            table: None,
            session_token: None,
            order_id: None,
            operator: None,
            details: serde_json::Value::Null,
            at: clock.now(),
        }
    }

    pub fn table(mut self, table: u32) -> Self {
        self.table = Some(table);
        self
    }

    pub fn session(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Audit event consumer. Implementations must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default sink: unbounded channel into a logging worker task.
pub struct AuditLogger {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl AuditLogger {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn() -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tracing::info!(
                    target: "audit",
                    action = ?event.action,
                    table = ?event.table,
                    session = ?event.session_token,
                    order = ?event.order_id,
                    operator = ?event.operator,
                    details = %event.details,
                    "audit event"
                );
            }
        });
        Arc::new(Self { tx })
    }
}

impl AuditSink for AuditLogger {
    fn record(&self, event: AuditEvent) {
        // Receiver gone means shutdown; dropping the event is acceptable.
        let _ = self.tx.send(event);
    }
}

/// In-memory sink. Used by the test suites to assert that cleanup emits
/// exactly one event per transition and that invariant repairs are visible.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .count()
    }
}

impl AuditSink for RecordingSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
