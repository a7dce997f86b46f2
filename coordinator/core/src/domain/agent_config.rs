// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0

// Agent Configuration Types
//
// Defines the configuration manifest for a Kestrel build agent host:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Lock coordination settings (enablement, sockets directory, scope, framing)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::scope::LockScope;

pub const API_VERSION: &str = "kestrel.dev/v1";
pub const KIND: &str = "AgentConfig";

/// Well-known file name of the lock leader socket inside `sockets_path`.
pub const LEADER_SOCKET_NAME: &str = "lock-leader.sock";

/// Well-known file name of the lock leader PID file inside `sockets_path`.
pub const LEADER_PID_NAME: &str = "lock-leader.pid";

/// Top-level Kubernetes-style agent configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// API version (must be "kestrel.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "AgentConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: AgentConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable agent host name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfigSpec {
    /// Machine-scoped lock coordination
    #[serde(default)]
    pub locks: LocksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocksConfig {
    /// Whether the leader serves lock operations at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding the leader socket and PID file
    #[serde(default = "default_sockets_path")]
    pub sockets_path: PathBuf,

    /// Lock namespace (only "machine" is supported)
    #[serde(default)]
    pub scope: LockScope,

    /// Largest accepted request/response frame
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// How often the leader sweeps idle waiter channels
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl LocksConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.sockets_path.join(LEADER_SOCKET_NAME)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.sockets_path.join(LEADER_PID_NAME)
    }
}

fn default_true() -> bool {
    true
}

fn default_sockets_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".kestrel").join("sockets"))
        .unwrap_or_else(|| std::env::temp_dir().join("kestrel-sockets"))
}

fn default_max_frame_bytes() -> usize {
    64 * 1024
}

fn default_sweep_interval() -> u64 {
    30
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sockets_path: default_sockets_path(),
            scope: LockScope::Machine,
            max_frame_bytes: default_max_frame_bytes(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "kestrel-agent".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                labels: None,
            },
            spec: AgentConfigSpec::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. KESTREL_CONFIG_PATH environment variable
    /// 2. ./kestrel-config.yaml (working directory)
    /// 3. ~/.kestrel/config.yaml (user home)
    /// 4. /etc/kestrel/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("KESTREL_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./kestrel-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".kestrel").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/kestrel/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path: fail if missing or invalid
        if let Some(path) = cli_path {
            tracing::debug!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::debug!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("KESTREL_SOCKETS_PATH") {
            if !val.is_empty() {
                tracing::debug!("Environment override: KESTREL_SOCKETS_PATH={}", val);
                self.spec.locks.sockets_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var("KESTREL_LOCKS_ENABLED") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => self.spec.locks.enabled = true,
                "false" | "0" | "no" | "off" => self.spec.locks.enabled = false,
                _ => {
                    tracing::warn!(
                        "Invalid value for KESTREL_LOCKS_ENABLED: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let locks = &self.spec.locks;
        if locks.sockets_path.as_os_str().is_empty() {
            anyhow::bail!("spec.locks.sockets_path cannot be empty");
        }

        if locks.max_frame_bytes < 1024 {
            anyhow::bail!(
                "spec.locks.max_frame_bytes must be at least 1024 (got {})",
                locks.max_frame_bytes
            );
        }

        if locks.sweep_interval_seconds == 0 {
            anyhow::bail!("spec.locks.sweep_interval_seconds must be greater than zero");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let config = AgentConfig::default();
        assert_eq!(config.api_version, "kestrel.dev/v1");
        assert_eq!(config.kind, "AgentConfig");
        assert!(!config.metadata.name.is_empty());
        assert!(config.spec.locks.enabled);
        assert_eq!(config.spec.locks.scope, LockScope::Machine);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: kestrel.dev/v1
kind: AgentConfig
metadata:
  name: ci-runner-7
spec:
  locks:
    sockets_path: /var/run/kestrel
"#;
        let config = AgentConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.metadata.name, "ci-runner-7");
        assert_eq!(
            config.spec.locks.socket_path(),
            PathBuf::from("/var/run/kestrel/lock-leader.sock")
        );
        assert!(config.spec.locks.enabled);
        assert_eq!(config.spec.locks.max_frame_bytes, 64 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_scope_fails_to_parse() {
        let yaml = r#"
apiVersion: kestrel.dev/v1
kind: AgentConfig
metadata:
  name: ci-runner-7
spec:
  locks:
    scope: cluster
"#;
        assert!(AgentConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = AgentConfig::default();
        config.metadata.name = "builder".to_string();
        config.spec.locks.sockets_path = dir.path().join("sockets");
        config.spec.locks.enabled = false;
        config.to_yaml_file(&path).unwrap();

        let loaded = AgentConfig::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.metadata.name, "builder");
        assert_eq!(loaded.spec.locks.pid_path(), dir.path().join("sockets").join("lock-leader.pid"));
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = AgentConfig::load_or_default(Some(dir.path().join("absent.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = AgentConfig::default();
        assert!(config.validate().is_ok());

        config.api_version = "wrong/v1".to_string();
        assert!(config.validate().is_err());
        config.api_version = API_VERSION.to_string();

        config.kind = "NodeConfig".to_string();
        assert!(config.validate().is_err());
        config.kind = KIND.to_string();

        config.metadata.name = String::new();
        assert!(config.validate().is_err());
        config.metadata.name = "builder".to_string();

        config.spec.locks.max_frame_bytes = 16;
        assert!(config.validate().is_err());
        config.spec.locks.max_frame_bytes = 4096;

        config.spec.locks.sweep_interval_seconds = 0;
        assert!(config.validate().is_err());
    }
}
