use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

// ── Helper defaults for serde ──

fn default_initial_state() -> String {
    "creation".to_string()
}

// ── Top-level DTO ──

/// The state machine configuration document as written in YAML.
///
/// Attributes and states keep their declaration order, and duplicate names
/// survive deserialization so that validation can report them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StmConfigDto {
    #[serde(default = "default_initial_state")]
    pub initial_state: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deletable_in_states: Vec<String>,
    #[serde(
        default,
        deserialize_with = "ordered_entries",
        serialize_with = "serialize_entries"
    )]
    pub attributes: Vec<(String, AttributeDeclDto)>,
    #[serde(
        default,
        deserialize_with = "ordered_entries",
        serialize_with = "serialize_entries"
    )]
    pub states: Vec<(String, StateDto)>,
}

// ── Attributes ──

/// `name: string` or `price: { type: number, min: 0 }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeDeclDto {
    Shorthand(String),
    Detailed(AttributeSpecDto),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeSpecDto {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<String>>,
}

// ── States ──

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateDto {
    #[serde(default)]
    pub state_transitions: Vec<TransitionDto>,
    #[serde(default)]
    pub mutables: Vec<MutableDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionDto {
    pub next_state: String,
    pub when: String,
    #[serde(default, rename = "do", skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MutableDto {
    pub attributes: Vec<String>,
    pub by_roles: Vec<String>,
}

// ── Ordered mapping support ──

/// Deserialize a mapping into a list of entries, keeping declaration order
/// and duplicate keys.
fn ordered_entries<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct EntriesVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping of names to declarations")
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, T>()? {
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_any(EntriesVisitor(PhantomData))
}

#[allow(clippy::ptr_arg)]
fn serialize_entries<S, T>(entries: &Vec<(String, T)>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    serializer.collect_map(entries.iter().map(|(k, v)| (k, v)))
}
