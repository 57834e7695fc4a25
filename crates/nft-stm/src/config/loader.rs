//! Configuration loader
//!
//! Reads the state machine YAML document from disk and resolves where it
//! lives. Validation happens when the document is turned into an engine.

use std::path::{Path, PathBuf};
use tracing::debug;

use super::dto::StmConfigDto;
use crate::error::{StmError, StmResult};

/// Environment variable naming the state machine configuration file.
pub const CONFIG_FILE_ENV: &str = "STM_CONFIG_FILE";

/// Environment variable holding the object key prefix for uploaded content.
pub const FILE_PREFIX_ENV: &str = "NFT_FILE_PREFIX";

pub const DEFAULT_CONFIG_FILE: &str = "config/stm_example.yaml";

const DEFAULT_FILE_PREFIX: &str = "nft";

/// Parse a YAML string into a StmConfigDto.
///
/// Validation is NOT performed here; `StmEngine::from_config` validates the
/// document before building the runtime types.
pub fn parse_config_yaml(yaml_str: &str) -> StmResult<StmConfigDto> {
    serde_yaml::from_str(yaml_str).map_err(|e| StmError::Config(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct StmConfigLoader {
    path: PathBuf,
}

impl StmConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and deserialize the configuration document.
    pub fn load(&self) -> StmResult<StmConfigDto> {
        debug!("Reading state machine configuration from {}", self.path.display());

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            StmError::Config(format!("failed to read {}: {}", self.path.display(), e))
        })?;

        parse_config_yaml(&content).map_err(|e| match e {
            StmError::Config(msg) => {
                StmError::Config(format!("failed to parse {}: {}", self.path.display(), msg))
            }
            other => other,
        })
    }
}

fn resolve_config_path(explicit: Option<String>) -> PathBuf {
    explicit
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Settings for the NFT service layer.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Prefix for object keys of uploaded content.
    pub file_prefix: String,
    /// State machine configuration the service loads its engine from.
    pub config_file: PathBuf,
}

impl ServiceSettings {
    /// Read `NFT_FILE_PREFIX` and `STM_CONFIG_FILE`, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            file_prefix: std::env::var(FILE_PREFIX_ENV)
                .ok()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_FILE_PREFIX.to_string()),
            config_file: resolve_config_path(std::env::var(CONFIG_FILE_ENV).ok()),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dto::AttributeDeclDto;
    use std::io::Write;

    const BASIC: &str = r#"
attributes:
  name: string
  price:
    type: number
    min: 0
states:
  creation:
    state_transitions:
      - next_state: setup_nft
        when: name is present
    mutables:
      - attributes: [name]
        by_roles: [creator]
  setup_nft:
    mutables:
      - attributes: [price]
        by_roles: [creator, editor]
"#;

    #[test]
    fn test_basic_yaml_parse() {
        let dto = parse_config_yaml(BASIC).unwrap();
        assert_eq!(dto.initial_state, "creation");
        assert!(dto.deletable_in_states.is_empty());
        assert_eq!(dto.attributes.len(), 2);
        assert_eq!(dto.attributes[0].0, "name");
        assert!(matches!(dto.attributes[0].1, AttributeDeclDto::Shorthand(ref t) if t == "string"));
        match &dto.attributes[1].1 {
            AttributeDeclDto::Detailed(spec) => {
                assert_eq!(spec.kind, "number");
                assert_eq!(spec.min, Some(0.0));
            }
            other => panic!("Expected detailed declaration, got {:?}", other),
        }

        let state_names: Vec<_> = dto.states.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(state_names, vec!["creation", "setup_nft"]);
        let creation = &dto.states[0].1;
        assert_eq!(creation.state_transitions[0].next_state, "setup_nft");
        assert!(creation.state_transitions[0].action.is_none());
        assert!(dto.states[1].1.state_transitions.is_empty());
    }

    #[test]
    fn test_transition_action_key_is_do() {
        let yaml = r#"
attributes:
  name: string
  title: string
states:
  a:
    state_transitions:
      - next_state: b
        when: "true"
        do: title = name
  b: {}
"#;
        let dto = parse_config_yaml(yaml).unwrap();
        assert_eq!(
            dto.states[0].1.state_transitions[0].action.as_deref(),
            Some("title = name")
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
attributes:
  name: string
states:
  creation:
    mutable:
      - attributes: [name]
        by_roles: [creator]
"#;
        let err = parse_config_yaml(yaml).unwrap_err();
        assert!(matches!(err, StmError::Config(_)));
    }

    #[test]
    fn test_loader_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BASIC.as_bytes()).unwrap();

        let loader = StmConfigLoader::new(file.path());
        let dto = loader.load().unwrap();
        assert_eq!(dto.states.len(), 2);
    }

    #[test]
    fn test_loader_missing_file_is_config_error() {
        let loader = StmConfigLoader::new("/definitely/not/here.yaml");
        let err = loader.load().unwrap_err();
        match err {
            StmError::Config(msg) => assert!(msg.contains("failed to read")),
            other => panic!("Expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_service_settings_from_env() {
        std::env::set_var(FILE_PREFIX_ENV, "art");
        std::env::set_var(CONFIG_FILE_ENV, "/etc/stm.yaml");
        let settings = ServiceSettings::from_env();
        assert_eq!(settings.file_prefix, "art");
        assert_eq!(settings.config_file, PathBuf::from("/etc/stm.yaml"));

        std::env::remove_var(FILE_PREFIX_ENV);
        std::env::remove_var(CONFIG_FILE_ENV);
        let settings = ServiceSettings::from_env();
        assert_eq!(settings.file_prefix, DEFAULT_FILE_PREFIX);
        assert_eq!(settings.config_file, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn test_resolve_config_path() {
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from(DEFAULT_CONFIG_FILE)
        );
        assert_eq!(
            resolve_config_path(Some("  ".to_string())),
            PathBuf::from(DEFAULT_CONFIG_FILE)
        );
        assert_eq!(
            resolve_config_path(Some("/etc/stm.yaml".to_string())),
            PathBuf::from("/etc/stm.yaml")
        );
    }
}
