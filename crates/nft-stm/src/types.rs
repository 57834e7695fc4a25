//! Entity and actor types shared by the engine and the service layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::attributes::AttributeType;

/// Entity identifier.
pub type NftId = i64;

/// User identifier.
pub type UserId = i64;

/// Attribute snapshot of an entity, keyed by attribute name.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Role label appended for the user that originated an entity.
pub const CREATOR_ROLE: &str = "creator";

/// A user identity plus the role labels resolved for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub roles: BTreeSet<String>,
}

impl Actor {
    pub fn new<I, S>(id: UserId, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Comma separated role list for messages.
    pub fn roles_display(&self) -> String {
        self.roles.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// A stored user, as handed over by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Stored role identifiers, resolved to labels by a `RoleResolver`.
    #[serde(default)]
    pub roles: Vec<i64>,
}

/// The managed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nft {
    pub id: NftId,
    pub state: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Nft {
    pub fn new(id: NftId, created_by: UserId, initial_state: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: initial_state.into(),
            attributes: Attributes::new(),
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }
}

/// Binary payload for a content-reference attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// One attribute write in an update sequence.
///
/// `value` is JSON text; `None` clears the attribute. When `file` is set the
/// value is replaced by the URI of the uploaded content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftUpdate {
    pub attribute: String,
    pub value: Option<String>,
    pub file: Option<ContentUpload>,
}

impl NftUpdate {
    pub fn set(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: Some(value.into()),
            file: None,
        }
    }

    pub fn clear(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: None,
            file: None,
        }
    }

    pub fn upload(attribute: impl Into<String>, content: ContentUpload) -> Self {
        Self {
            attribute: attribute.into(),
            value: None,
            file: Some(content),
        }
    }
}

/// Entity view returned to callers, enriched with what the actor may set next.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NftView {
    #[serde(flatten)]
    pub nft: Nft,
    pub allowed_actions: BTreeMap<String, AttributeType>,
}
