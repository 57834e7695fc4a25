//! Role resolution boundary: stored role identifiers to role labels.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

#[async_trait]
pub trait RoleResolver: Send + Sync {
    /// Labels for the given role ids. Unknown ids are skipped.
    async fn labels(&self, role_ids: &[i64]) -> Result<Vec<String>>;
}

/// Fixed id → label table.
#[derive(Debug, Clone, Default)]
pub struct StaticRoleResolver {
    labels: HashMap<i64, String>,
}

impl StaticRoleResolver {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        Self {
            labels: entries.into_iter().map(|(id, l)| (id, l.into())).collect(),
        }
    }
}

#[async_trait]
impl RoleResolver for StaticRoleResolver {
    async fn labels(&self, role_ids: &[i64]) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(role_ids.len());
        for id in role_ids {
            match self.labels.get(id) {
                Some(label) => out.push(label.clone()),
                None => debug!(role_id = id, "Unknown role id"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_known_ids_in_order() {
        let resolver = StaticRoleResolver::new([(1, "admin"), (2, "editor")]);
        let labels = resolver.labels(&[2, 9, 1]).await.unwrap();
        assert_eq!(labels, vec!["editor", "admin"]);
    }
}
