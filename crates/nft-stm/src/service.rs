//! NFT service
//!
//! The caller-facing operations. Every mutation of one entity runs under that
//! entity's lock and against a single engine snapshot taken at its start.

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::loader::ServiceSettings;
use crate::content::{ContentStore, ContentStoreError};
use crate::engine::StmEngine;
use crate::error::{ErrorKind, StmError, StmResult};
use crate::lock::EntityLocks;
use crate::roles::RoleResolver;
use crate::store::{NftFilter, NftStore};
use crate::types::{Actor, ContentUpload, Nft, NftId, NftUpdate, NftView, User, CREATOR_ROLE};
use crate::watcher::SharedEngine;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Stm(#[from] StmError),

    #[error("nft {0} does not exist")]
    NotFound(NftId),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("content upload failed: {0}")]
    Content(#[from] ContentStoreError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ServiceError {
    /// HTTP status a transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Stm(e) => match e.kind() {
                ErrorKind::NotAllowed => 403,
                ErrorKind::InvalidValue => 400,
                ErrorKind::Config | ErrorKind::Internal => 500,
            },
            Self::NotFound(_) => 404,
            Self::Forbidden(_) => 403,
            Self::BadRequest(_) => 400,
            Self::Content(_) | Self::Store(_) => 500,
        }
    }

    /// Message safe to hand to a client.
    pub fn client_message(&self) -> String {
        match self {
            Self::Stm(e) => e.client_message(),
            Self::Content(_) | Self::Store(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

pub struct NftService {
    engine: Arc<SharedEngine>,
    locks: EntityLocks<NftId>,
    store: Arc<dyn NftStore>,
    content: Arc<dyn ContentStore>,
    roles: Arc<dyn RoleResolver>,
    settings: ServiceSettings,
}

impl NftService {
    pub fn new(
        engine: Arc<SharedEngine>,
        store: Arc<dyn NftStore>,
        content: Arc<dyn ContentStore>,
        roles: Arc<dyn RoleResolver>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            engine,
            locks: EntityLocks::new(),
            store,
            content,
            roles,
            settings,
        }
    }

    /// Build a service around the engine loaded from `settings.config_file`.
    pub fn from_settings(
        settings: ServiceSettings,
        store: Arc<dyn NftStore>,
        content: Arc<dyn ContentStore>,
        roles: Arc<dyn RoleResolver>,
    ) -> StmResult<Self> {
        let engine = Arc::new(SharedEngine::from_path(settings.config_file.clone())?);
        info!(
            config = %settings.config_file.display(),
            file_prefix = %settings.file_prefix,
            "NFT service configured"
        );
        Ok(Self::new(engine, store, content, roles, settings))
    }

    /// Snapshot of the active engine.
    pub fn engine(&self) -> Arc<StmEngine> {
        self.engine.load()
    }

    /// Whether an operation currently holds the lock for `id`.
    pub fn is_locked(&self, id: NftId) -> bool {
        self.locks.is_locked(&id)
    }

    pub fn sortable_fields(&self) -> Vec<String> {
        self.engine.load().sortable_fields()
    }

    /// Role labels of `user`, plus `creator` when they originated `nft`.
    pub async fn actor_for(&self, user: &User, nft: &Nft) -> ServiceResult<Actor> {
        let mut roles = self.roles.labels(&user.roles).await?;
        if nft.created_by == user.id {
            roles.push(CREATOR_ROLE.to_string());
        }
        Ok(Actor::new(user.id, roles))
    }

    pub async fn get_nft(&self, user: &User, id: NftId) -> ServiceResult<NftView> {
        let engine = self.engine.load();
        let nft = self.find_one(id).await?;
        let actor = self.actor_for(user, &nft).await?;
        view(&engine, &actor, nft)
    }

    /// Apply an ordered update sequence to entity `id` and let it settle.
    ///
    /// When `id` does not exist a new entity with that id is started for
    /// `user` in the initial state. Nothing is persisted for the entity
    /// unless every write and the advancement succeed.
    pub async fn apply_nft_updates(
        &self,
        user: &User,
        id: NftId,
        updates: Vec<NftUpdate>,
    ) -> ServiceResult<NftView> {
        let _guard = self.locks.acquire(id).await;
        let engine = self.engine.load();

        let (mut nft, created) = match self.store.find_by_id(id).await? {
            Some(nft) => (nft, false),
            None => (Nft::new(id, user.id, engine.initial_state()), true),
        };
        let actor = self.actor_for(user, &nft).await?;

        let mut resolved = Vec::with_capacity(updates.len());
        for update in updates {
            match update.file {
                Some(file) => {
                    let value = self
                        .upload_content(&engine, &actor, &nft, &update.attribute, file)
                        .await?;
                    resolved.push(NftUpdate::set(update.attribute, value));
                }
                None => resolved.push(update),
            }
        }

        engine
            .apply_updates(&actor, &mut nft, &resolved)
            .map_err(|e| log_rejection(nft.id, e))?;
        self.store.persist(&nft).await?;
        if created {
            info!(nft_id = nft.id, created_by = user.id, state = %nft.state, "Created nft");
        } else {
            debug!(nft_id = nft.id, state = %nft.state, "Persisted nft");
        }

        view(&engine, &actor, nft)
    }

    /// Delete entity `id`. Only its creator may, and only in a deletable
    /// state.
    pub async fn delete_nft(&self, user: &User, id: NftId) -> ServiceResult<()> {
        let _guard = self.locks.acquire(id).await;
        let engine = self.engine.load();
        let nft = self.find_one(id).await?;

        if nft.created_by != user.id {
            return Err(ServiceError::Forbidden(
                "no permission to delete this nft (only the creator may)".to_string(),
            ));
        }
        if !engine.is_deletable_in(&nft.state) {
            return Err(ServiceError::Forbidden(format!(
                "no permission to delete this nft (state '{}' does not allow deletion)",
                nft.state
            )));
        }

        self.store.delete(id).await?;
        info!(nft_id = id, deleted_by = user.id, "Deleted nft");
        Ok(())
    }

    pub async fn find_all(&self, filter: &NftFilter) -> ServiceResult<Vec<Nft>> {
        let sortable = self.engine.load().sortable_fields();
        if !sortable.iter().any(|f| f == &filter.order_by) {
            return Err(ServiceError::BadRequest(format!(
                "cannot order by '{}'",
                filter.order_by
            )));
        }
        Ok(self.store.list(filter).await?)
    }

    async fn find_one(&self, id: NftId) -> ServiceResult<Nft> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::NotFound(id))
    }

    /// Upload content for a content-reference attribute, after confirming the
    /// actor may set it. Returns the JSON value to apply.
    async fn upload_content(
        &self,
        engine: &StmEngine,
        actor: &Actor,
        nft: &Nft,
        attribute: &str,
        file: ContentUpload,
    ) -> ServiceResult<String> {
        let allowed = engine.get_allowed_actions(actor, nft)?;
        let Some(ty) = allowed.get(attribute) else {
            return Err(ServiceError::Forbidden(format!(
                "attribute '{}' is not allowed to be set by you for nft with state '{}'",
                attribute, nft.state
            )));
        };
        if !ty.is_content() {
            return Err(ServiceError::BadRequest(format!(
                "attribute '{}' is not of type content_uri",
                attribute
            )));
        }

        let key = format!("{}_{}_{}", self.settings.file_prefix, nft.id, attribute);
        let uri = self
            .content
            .upload(&key, &file.bytes, &file.content_type)
            .await?;
        debug!(nft_id = nft.id, attribute, %uri, "Uploaded content");
        Ok(serde_json::Value::String(uri).to_string())
    }
}

fn view(engine: &StmEngine, actor: &Actor, nft: Nft) -> ServiceResult<NftView> {
    let allowed_actions = engine.get_allowed_actions(actor, &nft)?;
    Ok(NftView {
        nft,
        allowed_actions,
    })
}

fn log_rejection(nft_id: NftId, e: StmError) -> StmError {
    if e.kind() == ErrorKind::Internal {
        error!(nft_id, error = %e, "Update failed with internal error");
    }
    e
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let not_allowed = ServiceError::from(StmError::NotAllowed {
            attribute: "name".into(),
            state: "creation".into(),
            roles: String::new(),
        });
        assert_eq!(not_allowed.status_code(), 403);

        let invalid = ServiceError::from(StmError::UnknownAttribute("x".into()));
        assert_eq!(invalid.status_code(), 400);

        let cycle = ServiceError::from(StmError::TransitionCycle { path: vec![] });
        assert_eq!(cycle.status_code(), 500);
        assert_eq!(cycle.client_message(), "internal error");

        assert_eq!(ServiceError::NotFound(3).status_code(), 404);
        assert_eq!(
            ServiceError::Store(anyhow::anyhow!("db down")).client_message(),
            "internal error"
        );
    }
}
