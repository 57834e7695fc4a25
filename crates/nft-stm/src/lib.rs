//! NFT State Transition Machine
//!
//! Configuration-driven lifecycle engine for NFT records: which roles may set
//! which attributes in which state, and which guarded transitions move a
//! record on once its attributes change.
//!
//! # Architecture
//!
//! ```text
//! stm.yaml ──► StmConfigLoader ──► StmEngine ──► SharedEngine ◄── ConfigWatcher
//!                                  │                 │
//!                 AttributeTypeRegistry              │ load() per operation
//!                 StateGraph (guards, actions)       ▼
//!                                               NftService
//!                                    EntityLocks · NftStore · ContentStore
//!                                                 · RoleResolver
//! ```

pub mod attributes;
pub mod config;
pub mod content;
pub mod engine;
pub mod error;
pub mod expr;
pub mod graph;
pub mod lock;
pub mod roles;
pub mod service;
pub mod store;
pub mod types;
pub mod watcher;

pub use attributes::{AttributeType, AttributeTypeRegistry};
pub use config::{ServiceSettings, StmConfigDto, StmConfigLoader};
pub use content::{ContentStore, ContentStoreError, LocalContentStore, MemoryContentStore};
pub use engine::StmEngine;
pub use error::{ErrorKind, StmError, StmResult};
pub use graph::{MutationRule, StateDefinition, StateGraph, Transition};
pub use lock::{EntityLockGuard, EntityLocks};
pub use roles::{RoleResolver, StaticRoleResolver};
pub use service::{NftService, ServiceError, ServiceResult};
pub use store::{MemoryNftStore, NftFilter, NftStore, SortDirection};
pub use types::{
    Actor, Attributes, ContentUpload, Nft, NftId, NftUpdate, NftView, User, UserId, CREATOR_ROLE,
};
pub use watcher::{ConfigWatcher, SharedEngine};
