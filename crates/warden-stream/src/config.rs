// ABOUTME: Configuration loading and validation for the session controller.
// ABOUTME: Supports TOML config files with environment variable expansion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::buffer::BufferConfig;
use crate::error::{Result, StreamError};
use crate::profile::{AssistantProfile, PageHelp, PolicyAssistant};
use crate::reconnect::ReconnectConfig;
use crate::session::parse_endpoint;

/// Top-level configuration for one assistant session.
#[derive(Clone, Deserialize)]
pub struct ControllerConfig {
    /// Streaming endpoint (ws:// or wss://).
    pub endpoint: String,
    /// Base URL of the session API used to issue new session ids.
    #[serde(default)]
    pub session_api: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
}

impl std::fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("endpoint", &redact_query(&self.endpoint))
            .field("session_api", &self.session_api)
            .field("reconnect", &self.reconnect)
            .field("buffer", &self.buffer)
            .field("profile", &self.profile)
            .finish()
    }
}

/// Endpoints may carry credentials in the query string.
fn redact_query(raw: &str) -> String {
    match raw.split_once('?') {
        Some((base, _)) => format!("{}?[REDACTED]", base),
        None => raw.to_string(),
    }
}

/// Which assistant the session talks to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProfileConfig {
    Policy {
        #[serde(default)]
        policy_id: Option<String>,
        #[serde(default = "default_document_categories")]
        document_categories: Vec<String>,
    },
    PageHelp {
        #[serde(default)]
        page: Option<String>,
    },
}

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig::Policy {
            policy_id: None,
            document_categories: default_document_categories(),
        }
    }
}

fn default_document_categories() -> Vec<String> {
    vec!["document".to_string()]
}

impl ProfileConfig {
    pub fn build(&self) -> Arc<dyn AssistantProfile> {
        match self {
            ProfileConfig::Policy {
                policy_id,
                document_categories,
            } => Arc::new(PolicyAssistant {
                policy_id: policy_id.clone(),
                document_categories: document_categories.clone(),
            }),
            ProfileConfig::PageHelp { page } => Arc::new(PageHelp { page: page.clone() }),
        }
    }
}

impl ControllerConfig {
    /// Config with defaults for everything but the endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            session_api: None,
            reconnect: ReconnectConfig::default(),
            buffer: BufferConfig::default(),
            profile: ProfileConfig::default(),
        }
    }

    /// Default location: `~/.config/warden/assistant.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("warden").join("assistant.toml"))
    }

    /// Load configuration from the specified path or default location.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path
            .or_else(Self::default_path)
            .ok_or_else(|| StreamError::Config("Could not determine config path".into()))?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StreamError::Config(format!("Failed to read config from {:?}: {}", path, e))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        // Expand environment variables, warning on undefined vars.
        let contents = shellexpand::env_with_context_no_errors(contents, |var: &str| {
            match std::env::var(var) {
                Ok(val) => Some(val),
                Err(_) => {
                    warn!(
                        variable = %var,
                        "Environment variable not defined, using empty string"
                    );
                    Some(String::new())
                }
            }
        });

        let config: ControllerConfig = toml::from_str(&contents)
            .map_err(|e| StreamError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        parse_endpoint(&self.endpoint)
            .map_err(|e| StreamError::Config(format!("endpoint: {}", e)))?;

        if let Some(api) = &self.session_api {
            let url = Url::parse(api)
                .map_err(|e| StreamError::Config(format!("session_api: {}", e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(StreamError::Config(
                    "session_api must be an http:// or https:// URL".into(),
                ));
            }
        }

        let r = &self.reconnect;
        if r.max_attempts == 0 {
            return Err(StreamError::Config(
                "reconnect.max_attempts must be at least 1".into(),
            ));
        }
        if r.growth_factor.is_nan() || r.growth_factor < 1.0 {
            return Err(StreamError::Config(
                "reconnect.growth_factor must be >= 1.0".into(),
            ));
        }
        if r.base_delay_ms == 0 || r.max_delay_ms < r.base_delay_ms {
            return Err(StreamError::Config(
                "reconnect delays must be non-zero with max_delay_ms >= base_delay_ms".into(),
            ));
        }

        let b = &self.buffer;
        if b.flush_interval_ms == 0 || b.forced_flush_interval_ms == 0 {
            return Err(StreamError::Config("buffer flush intervals must be non-zero".into()));
        }
        if b.max_held_bytes == 0 {
            return Err(StreamError::Config("buffer.max_held_bytes must be non-zero".into()));
        }
        Ok(())
    }

    pub fn endpoint_url(&self) -> Result<Url> {
        parse_endpoint(&self.endpoint)
    }

    pub fn session_api_url(&self) -> Result<Option<Url>> {
        self.session_api
            .as_deref()
            .map(|api| Url::parse(api).map_err(|e| StreamError::Config(e.to_string())))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ControllerConfig::from_toml(r#"endpoint = "wss://assist.example.com/ws""#)
            .unwrap();
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.buffer.flush_interval_ms, 100);
        assert_eq!(config.buffer.forced_flush_interval_ms, 1000);
        assert_eq!(config.profile, ProfileConfig::default());
        assert!(config.session_api.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = ControllerConfig::from_toml(
            r#"
endpoint = "wss://assist.example.com/ws/page"
session_api = "https://assist.example.com/api"

[reconnect]
base_delay_ms = 500
growth_factor = 1.5
max_delay_ms = 10000
max_attempts = 3

[buffer]
flush_interval_ms = 50
forced_flush_interval_ms = 500
max_held_bytes = 64

[profile]
kind = "page_help"
page = "controls"
"#,
        )
        .unwrap();
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.buffer.max_held_bytes, 64);
        assert_eq!(
            config.profile,
            ProfileConfig::PageHelp {
                page: Some("controls".into())
            }
        );
        assert_eq!(config.profile.build().name(), "page_help");
        assert_eq!(
            config.session_api_url().unwrap().unwrap().as_str(),
            "https://assist.example.com/api"
        );
    }

    #[test]
    fn test_policy_profile_defaults_document_category() {
        let config = ControllerConfig::from_toml(
            r#"
endpoint = "ws://localhost:8000/ws"
[profile]
kind = "policy"
policy_id = "pol-3"
"#,
        )
        .unwrap();
        let profile = config.profile.build();
        assert_eq!(profile.name(), "policy");
        assert!(profile.is_document(Some("document")));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            r#"endpoint = """#,
            r#"endpoint = "https://not-a-socket.example.com""#,
            "endpoint = \"ws://h/ws\"\n[reconnect]\nmax_attempts = 0",
            "endpoint = \"ws://h/ws\"\n[reconnect]\ngrowth_factor = 0.5",
            "endpoint = \"ws://h/ws\"\n[buffer]\nflush_interval_ms = 0",
            "endpoint = \"ws://h/ws\"\nsession_api = \"ftp://h\"",
        ];
        for case in cases {
            assert!(
                matches!(ControllerConfig::from_toml(case), Err(StreamError::Config(_))),
                "accepted: {}",
                case
            );
        }
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("WARDEN_TEST_ENDPOINT_HOST", "assist.internal");
        let config =
            ControllerConfig::from_toml(r#"endpoint = "wss://${WARDEN_TEST_ENDPOINT_HOST}/ws""#)
                .unwrap();
        assert_eq!(config.endpoint, "wss://assist.internal/ws");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"endpoint = "ws://localhost:8000/ws""#).unwrap();
        let config = ControllerConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.endpoint_url().unwrap().as_str(), "ws://localhost:8000/ws");
    }

    #[test]
    fn test_load_missing_file() {
        let err = ControllerConfig::load(Some(PathBuf::from("/nonexistent/assistant.toml")))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_debug_redacts_endpoint_query() {
        let config = ControllerConfig::new("wss://h/ws?token=secret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
