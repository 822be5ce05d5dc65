//! Catalog collaborator.
//!
//! The menu (categories, products, pricing rules) is owned elsewhere; the
//! lifecycle engine only needs availability checks and a price to snapshot
//! when a line item is first created. [`Catalog`] is the seam; the
//! in-process [`ProductCatalog`] is what ships, anything else (a repository,
//! an RPC client) can implement the trait.

use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Product metadata as the cart engine sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInfo {
    pub id: u32,
    pub name: String,
    pub price: Decimal,
    pub is_active: bool,
    pub is_available: bool,
}

impl ProductInfo {
    /// Orderable right now.
    pub fn is_orderable(&self) -> bool {
        self.is_active && self.is_available
    }
}

/// Product lookup seam consumed by the cart engine.
pub trait Catalog: Send + Sync {
    fn get_product(&self, id: u32) -> Option<ProductInfo>;
}

/// In-process catalog backed by a concurrent map.
#[derive(Debug, Default)]
pub struct ProductCatalog {
    products: DashMap<u32, ProductInfo>,
}

impl ProductCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert or replace a product.
    pub fn upsert(&self, product: ProductInfo) {
        self.products.insert(product.id, product);
    }

    pub fn remove(&self, id: u32) {
        self.products.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl Catalog for ProductCatalog {
    fn get_product(&self, id: u32) -> Option<ProductInfo> {
        self.products.get(&id).map(|p| p.clone())
    }
}
