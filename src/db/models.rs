//! Record types persisted by the [`Store`](super::Store).
//!
//! Three related records plus the line items owned by an order:
//! `DiningTable` ← `TableSession` (by table number), `DiningTable` ← `Order`
//! (one-way reference; occupancy is always derived by querying orders, the
//! table never points back at an order).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Physical table, identified by its human-facing number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiningTable {
    /// Unique table number printed on the QR code
    pub number: u32,
    pub seats: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// Create dining table payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TableCreate {
    #[validate(range(min = 1))]
    pub number: u32,
    #[validate(range(min = 1, max = 64))]
    pub seats: Option<i32>,
}

/// Update dining table payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TableUpdate {
    #[validate(range(min = 1, max = 64))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seats: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// Time-boxed session binding a customer's browser to a table.
///
/// Identity is the token (128-bit random, unguessable). The TTL is absolute
/// from creation: `last_used` is bookkeeping only and never extends
/// `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSession {
    pub token: String,
    /// Owning table number
    pub table: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    #[serde(default)]
    pub order_submitted: bool,
}

impl TableSession {
    /// Mint a session for `table` with the given absolute TTL.
    pub fn mint(table: u32, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            token: uuid::Uuid::new_v4().to_string(),
            table,
            is_active: true,
            created_at: now,
            expires_at: now + ttl,
            last_used: now,
            order_submitted: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Usable iff active and unexpired.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }

    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Terminal statuses do not count toward table occupancy.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

/// Resolved customer identity, supplied by the request layer.
///
/// The core never fabricates an identity from shared global state; callers
/// resolve one (authenticated customer, phone-identified, or anonymous) and
/// pass it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl CustomerRef {
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            phone: None,
        }
    }
}

/// A (product, quantity, captured price) row within an order.
///
/// `price` is snapshotted from the catalog when the row is first created and
/// never re-read on later quantity updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub id: String,
    pub product_id: u32,
    pub quantity: u32,
    pub price: Decimal,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl LineItem {
    pub fn new(product_id: u32, quantity: u32, price: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            product_id,
            quantity,
            price,
            notes: String::new(),
            created_at: now,
        }
    }

    pub fn subtotal(&self) -> Decimal {
        Decimal::from(self.quantity) * self.price
    }
}

/// Table-scoped order. While `status == Pending` this is the cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Human-facing number, `YYYYMMDD` + zero-padded counter
    pub order_number: String,
    /// Owning table number (one-way reference)
    pub table: u32,
    pub customer: CustomerRef,
    pub status: OrderStatus,
    pub items: Vec<LineItem>,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// New empty pending order (cart) for a table.
    pub fn new_pending(
        order_number: String,
        table: u32,
        customer: CustomerRef,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order_number,
            table,
            customer,
            status: OrderStatus::Pending,
            items: Vec::new(),
            total_amount: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            final_amount: Decimal::ZERO,
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sum of line-item quantities.
    pub fn cart_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Recompute `total_amount` and `final_amount` from current line items:
    /// `final = Σ quantity·price − discount`.
    pub fn recompute_totals(&mut self) {
        self.total_amount = self.items.iter().map(LineItem::subtotal).sum();
        self.final_amount = self.total_amount - self.discount_amount;
    }

    /// Collapse line items that reference the same product.
    ///
    /// Quantities of the duplicates are summed into the earliest-created row;
    /// the rest are dropped. Returns the number of rows removed (0 when the
    /// order was already clean). Totals are NOT recomputed here.
    pub fn merge_duplicate_items(&mut self) -> usize {
        let before = self.items.len();
        let mut merged: Vec<LineItem> = Vec::with_capacity(before);
        for item in self.items.drain(..) {
            match merged.iter_mut().find(|m| m.product_id == item.product_id) {
                Some(existing) => existing.quantity += item.quantity,
                None => merged.push(item),
            }
        }
        self.items = merged;
        before - self.items.len()
    }
}
