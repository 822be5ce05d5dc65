//! Table-session / cart lifecycle engine.
//!
//! Components, leaves first:
//!
//! - **registry**: physical table records and derived occupancy
//! - **session_store**: token → table bindings with absolute TTL
//! - **cart**: the single in-flight draft order per table
//! - **coordinator**: the state machine tying session validity to cart fate
//! - **sweep**: optional periodic expiry sweep (cleanup-latency optimization)
//!
//! # State machine
//!
//! ```text
//! NoSession ──access──▶ Active ──submit──▶ Submitted
//!     ▲                   │ │
//!     │        TTL elapsed│ │staff override
//!     │                   ▼ ▼
//!     └──cleanup── Expired / Deactivated
//! ```
//!
//! The coordinator is the only component that orchestrates multi-step
//! sequences across the others; nothing calls back into it, so per-table
//! lock acquisition is never reentrant.

pub mod cart;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod registry;
pub mod session_store;
pub mod sweep;

pub use cart::CartEngine;
pub use coordinator::{
    CartSummary, LifecycleConfig, LifecycleCoordinator, SessionFilter, SubmitItem, SubmitPayload,
    TokenValidation,
};
pub use error::{CoreError, CoreResult};
pub use events::LifecycleEvent;
pub use registry::TableRegistry;
pub use session_store::SessionStore;
pub use sweep::SweepWorker;
