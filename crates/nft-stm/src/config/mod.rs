//! Configuration document model and loading.

pub mod dto;
pub mod loader;

pub use dto::{AttributeDeclDto, AttributeSpecDto, MutableDto, StateDto, StmConfigDto, TransitionDto};
pub use loader::{parse_config_yaml, ServiceSettings, StmConfigLoader};
