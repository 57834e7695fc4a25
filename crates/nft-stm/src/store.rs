//! Entity persistence boundary.
//!
//! The service reads and writes entities only through [`NftStore`].
//! [`MemoryNftStore`] backs tests and the CLI.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::RwLock;

use crate::types::{Nft, NftId, UserId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Listing parameters. Empty `states`/`ids` mean no restriction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftFilter {
    #[serde(default)]
    pub states: Vec<String>,
    #[serde(default)]
    pub ids: Vec<NftId>,
    /// `id`, `state`, `created_at`, `updated_at` or an attribute name.
    #[serde(default = "default_order_by")]
    pub order_by: String,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn default_order_by() -> String {
    "id".to_string()
}

impl Default for NftFilter {
    fn default() -> Self {
        Self {
            states: Vec::new(),
            ids: Vec::new(),
            order_by: default_order_by(),
            direction: SortDirection::Asc,
            offset: 0,
            limit: None,
        }
    }
}

impl NftFilter {
    fn matches(&self, nft: &Nft) -> bool {
        (self.states.is_empty() || self.states.contains(&nft.state))
            && (self.ids.is_empty() || self.ids.contains(&nft.id))
    }

    fn compare(&self, a: &Nft, b: &Nft) -> Ordering {
        let ord = match self.order_by.as_str() {
            "id" => a.id.cmp(&b.id),
            "state" => a.state.cmp(&b.state),
            "created_at" => a.created_at.cmp(&b.created_at),
            "updated_at" => a.updated_at.cmp(&b.updated_at),
            attr => compare_values(a.attribute(attr), b.attribute(attr)),
        };
        let ord = match self.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        };
        ord.then_with(|| a.id.cmp(&b.id))
    }
}

/// Absent values sort after present ones; mismatched kinds fall back to
/// their JSON text.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Persistence trait for entities.
#[async_trait]
pub trait NftStore: Send + Sync {
    async fn find_by_id(&self, id: NftId) -> Result<Option<Nft>>;
    /// Insert a new entity with a store-assigned id.
    async fn create(&self, created_by: UserId, state: &str) -> Result<Nft>;
    async fn persist(&self, nft: &Nft) -> Result<()>;
    /// Returns whether an entity was removed.
    async fn delete(&self, id: NftId) -> Result<bool>;
    async fn list(&self, filter: &NftFilter) -> Result<Vec<Nft>>;
}

// ── MemoryNftStore ──

/// In-memory NftStore for testing and the CLI.
pub struct MemoryNftStore {
    inner: RwLock<HashMap<NftId, Nft>>,
    next_id: AtomicI64,
}

impl MemoryNftStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for MemoryNftStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NftStore for MemoryNftStore {
    async fn find_by_id(&self, id: NftId) -> Result<Option<Nft>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(store.get(&id).cloned())
    }

    async fn create(&self, created_by: UserId, state: &str) -> Result<Nft> {
        let mut store = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        // Entities persisted under explicit ids may already occupy the slot.
        while store.contains_key(&id) {
            id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        }
        let nft = Nft::new(id, created_by, state);
        store.insert(id, nft.clone());
        Ok(nft)
    }

    async fn persist(&self, nft: &Nft) -> Result<()> {
        let mut store = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut stored = nft.clone();
        if let Some(existing) = store.get(&nft.id) {
            // Creation metadata is immutable once written.
            stored.created_by = existing.created_by;
            stored.created_at = existing.created_at;
        }
        store.insert(nft.id, stored);
        Ok(())
    }

    async fn delete(&self, id: NftId) -> Result<bool> {
        let mut store = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(store.remove(&id).is_some())
    }

    async fn list(&self, filter: &NftFilter) -> Result<Vec<Nft>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut results: Vec<Nft> = store
            .values()
            .filter(|nft| filter.matches(nft))
            .cloned()
            .collect();
        results.sort_by(|a, b| filter.compare(a, b));

        let page = results.into_iter().skip(filter.offset);
        Ok(match filter.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }
}
