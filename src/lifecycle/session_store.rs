//! Session store.
//!
//! Token → table bindings with an absolute TTL. The store owns the session
//! rows and the active flag; it never touches orders. Cleanup that spans
//! sessions AND carts (expiry, staff deactivation, freeing a table) is
//! composed by the coordinator inside one write transaction, which is why
//! most mutators here take a [`WriteTransaction`].

use std::sync::Arc;

use redb::WriteTransaction;
use tracing::{debug, warn};

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::db::{Store, TableSession};
use crate::lifecycle::{CoreError, CoreResult};
use crate::utils::Clock;

#[derive(Clone)]
pub struct SessionStore {
    store: Store,
    audit: Arc<dyn AuditSink>,
    clock: Clock,
    ttl: chrono::Duration,
}

impl SessionStore {
    pub fn new(store: Store, audit: Arc<dyn AuditSink>, clock: Clock, ttl: chrono::Duration) -> Self {
        Self {
            store,
            audit,
            clock,
            ttl,
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Mint a fresh session for the table (within the caller's transaction).
    ///
    /// Any session still flagged active for the table is deactivated first,
    /// so at most one active session per table can ever be committed.
    /// Returns the new session and the sessions it displaced.
    pub fn create_txn(
        &self,
        txn: &WriteTransaction,
        table: u32,
    ) -> CoreResult<(TableSession, Vec<TableSession>)> {
        let now = self.clock.now();
        let mut displaced = Vec::new();
        for mut stale in self.store.active_sessions_for_table_txn(txn, table)? {
            warn!(table, token = %stale.token, "displacing stale active session");
            stale.is_active = false;
            self.store.put_session(txn, &stale)?;
            self.audit.record(
                AuditEvent::new(AuditAction::SessionDeactivated, &self.clock)
                    .table(table)
                    .session(stale.token.clone())
                    .details(serde_json::json!({ "reason": "displaced" })),
            );
            displaced.push(stale);
        }

        let session = TableSession::mint(table, now, self.ttl);
        self.store.put_session(txn, &session)?;
        self.audit.record(
            AuditEvent::new(AuditAction::SessionCreated, &self.clock)
                .table(table)
                .session(session.token.clone()),
        );
        debug!(table, token = %session.token, expires_at = %session.expires_at, "session created");
        Ok((session, displaced))
    }

    /// Validate a token and touch `last_used` (within the caller's
    /// transaction).
    ///
    /// Expiry is detected lazily here: an elapsed TTL flips the active flag
    /// before the error surfaces, and the caller is expected to finish the
    /// cleanup (cancel the pending order, discard the cart) in the same
    /// transaction.
    pub fn validate_txn(
        &self,
        txn: &WriteTransaction,
        token: &str,
    ) -> CoreResult<TableSession> {
        let now = self.clock.now();
        let mut session = self
            .store
            .get_session_txn(txn, token)?
            .ok_or(CoreError::SessionNotFound)?;

        if !session.is_active {
            // Report the cause, not just the flag: a session that lapsed is
            // "expired" on every later probe, not "deactivated".
            if session.is_expired(now) {
                return Err(CoreError::SessionExpired);
            }
            return Err(CoreError::SessionInvalid);
        }
        if session.is_expired(now) {
            self.deactivate_txn(txn, &session, true, None)?;
            return Err(CoreError::SessionExpired);
        }

        session.last_used = now;
        self.store.put_session(txn, &session)?;
        Ok(session)
    }

    /// Flip the active flag off (within the caller's transaction).
    ///
    /// Guarded by `is_active`: deactivating twice is a no-op and emits no
    /// second audit event. Returns whether the flag actually changed.
    pub fn deactivate_txn(
        &self,
        txn: &WriteTransaction,
        session: &TableSession,
        expired: bool,
        operator: Option<&str>,
    ) -> CoreResult<bool> {
        let mut current = self
            .store
            .get_session_txn(txn, &session.token)?
            .ok_or(CoreError::SessionNotFound)?;
        if !current.is_active {
            return Ok(false);
        }
        current.is_active = false;
        self.store.put_session(txn, &current)?;

        let action = if expired {
            AuditAction::SessionExpired
        } else {
            AuditAction::SessionDeactivated
        };
        let mut event = AuditEvent::new(action, &self.clock)
            .table(current.table)
            .session(current.token.clone());
        if let Some(op) = operator {
            event = event.operator(op);
        }
        self.audit.record(event);
        debug!(table = current.table, token = %current.token, expired, "session deactivated");
        Ok(true)
    }

    /// Record that the session's cart was submitted. The session stays
    /// active so the customer can keep checking their order until the TTL
    /// runs out.
    pub fn mark_submitted_txn(
        &self,
        txn: &WriteTransaction,
        token: &str,
    ) -> CoreResult<TableSession> {
        let mut session = self
            .store
            .get_session_txn(txn, token)?
            .ok_or(CoreError::SessionNotFound)?;
        session.order_submitted = true;
        session.last_used = self.clock.now();
        self.store.put_session(txn, &session)?;
        Ok(session)
    }

    pub fn get(&self, token: &str) -> CoreResult<TableSession> {
        self.store
            .get_session(token)?
            .ok_or(CoreError::SessionNotFound)
    }

    /// The table's newest active session, if any. Read-only; the returned
    /// session may already be past its TTL.
    pub fn active_for_table(&self, table: u32) -> CoreResult<Option<TableSession>> {
        Ok(self.store.active_session_for_table(table)?)
    }

    /// All sessions, newest first, optionally narrowed to one table or to
    /// active sessions only.
    pub fn list(&self, table: Option<u32>, active_only: bool) -> CoreResult<Vec<TableSession>> {
        Ok(self
            .store
            .all_sessions()?
            .into_iter()
            .filter(|s| table.is_none_or(|t| s.table == t))
            .filter(|s| !active_only || s.is_active)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordingSink;

    fn session_store(clock: &Clock) -> (SessionStore, Store, Arc<RecordingSink>) {
        let store = Store::open_in_memory().unwrap();
        let sink = RecordingSink::new();
        let sessions = SessionStore::new(
            store.clone(),
            sink.clone(),
            clock.clone(),
            chrono::Duration::minutes(12),
        );
        (sessions, store, sink)
    }

    #[test]
    fn create_displaces_previous_active_session() {
        let clock = Clock::system();
        let (sessions, store, sink) = session_store(&clock);

        let txn = store.begin_write().unwrap();
        let (first, displaced) = sessions.create_txn(&txn, 5).unwrap();
        txn.commit().unwrap();
        assert!(displaced.is_empty());

        let txn = store.begin_write().unwrap();
        let (second, displaced) = sessions.create_txn(&txn, 5).unwrap();
        txn.commit().unwrap();
        assert_eq!(displaced.len(), 1);
        assert_eq!(displaced[0].token, first.token);
        assert_ne!(second.token, first.token);

        // Only the new session is active.
        let active = sessions.active_for_table(5).unwrap().unwrap();
        assert_eq!(active.token, second.token);
        assert_eq!(sink.count(AuditAction::SessionCreated), 2);
        assert_eq!(sink.count(AuditAction::SessionDeactivated), 1);
    }

    #[test]
    fn expired_token_is_deactivated_exactly_once() {
        let clock = Clock::system();
        let (sessions, store, sink) = session_store(&clock);

        let txn = store.begin_write().unwrap();
        let (session, _) = sessions.create_txn(&txn, 5).unwrap();
        txn.commit().unwrap();

        clock.advance(chrono::Duration::minutes(13));

        let txn = store.begin_write().unwrap();
        let err = sessions.validate_txn(&txn, &session.token).unwrap_err();
        txn.commit().unwrap();
        assert!(matches!(err, CoreError::SessionExpired));

        // Probing again still reports expiry but audits nothing new.
        let txn = store.begin_write().unwrap();
        let err = sessions.validate_txn(&txn, &session.token).unwrap_err();
        txn.commit().unwrap();
        assert!(matches!(err, CoreError::SessionExpired));
        assert_eq!(sink.count(AuditAction::SessionExpired), 1);
    }

    #[test]
    fn touch_never_extends_the_deadline() {
        let clock = Clock::system();
        let (sessions, store, _) = session_store(&clock);

        let txn = store.begin_write().unwrap();
        let (session, _) = sessions.create_txn(&txn, 5).unwrap();
        txn.commit().unwrap();

        clock.advance(chrono::Duration::minutes(6));
        let txn = store.begin_write().unwrap();
        let touched = sessions.validate_txn(&txn, &session.token).unwrap();
        txn.commit().unwrap();

        assert_eq!(touched.expires_at, session.expires_at);
        assert!(touched.last_used > session.last_used);
    }

    #[test]
    fn staff_deactivation_beats_expiry_reporting() {
        let clock = Clock::system();
        let (sessions, store, sink) = session_store(&clock);

        let txn = store.begin_write().unwrap();
        let (session, _) = sessions.create_txn(&txn, 5).unwrap();
        sessions
            .deactivate_txn(&txn, &session, false, Some("staff-1"))
            .unwrap();
        txn.commit().unwrap();

        let txn = store.begin_write().unwrap();
        let err = sessions.validate_txn(&txn, &session.token).unwrap_err();
        txn.commit().unwrap();
        assert!(matches!(err, CoreError::SessionInvalid));
        assert_eq!(sink.count(AuditAction::SessionDeactivated), 1);
        let event = sink.events().pop().unwrap();
        assert_eq!(event.operator.as_deref(), Some("staff-1"));
    }
}
