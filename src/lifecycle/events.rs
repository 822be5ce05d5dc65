//! Lifecycle event fan-out.
//!
//! The coordinator publishes every completed transition on a broadcast
//! channel. Delivery (push notifications, staff dashboards, kitchen
//! displays) is a subscriber concern; the core never addresses a specific
//! recipient group.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    SessionOpened {
        table: u32,
        token: String,
        expires_at: DateTime<Utc>,
    },
    SessionExpired {
        table: u32,
        token: String,
    },
    SessionDeactivated {
        table: u32,
        token: String,
    },
    CartDiscarded {
        table: u32,
        order_id: String,
        items_removed: usize,
    },
    OrderConfirmed {
        table: u32,
        order_id: String,
        order_number: String,
        final_amount: Decimal,
    },
    OrderCancelled {
        table: u32,
        order_id: String,
    },
    OrderDelivered {
        table: u32,
        order_id: String,
    },
    TableFreed {
        table: u32,
        cancelled_orders: usize,
    },
}
