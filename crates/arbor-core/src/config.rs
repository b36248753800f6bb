use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8432;
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Hard cap on a single inbound WS frame.
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024;

/// Deadline for non-streaming LLM calls.
pub const LLM_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Maximum gap between two streamed chunks before the stream is abandoned.
pub const LLM_STREAM_GAP_SECS: u64 = 60;
/// Graph-store busy deadline; a lock held longer surfaces `Unavailable`.
pub const STORE_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Top-level config (arbor.toml + flat env overrides).
///
/// Environment keys mirror the original deployment surface:
/// `GRAPH_PATH`, `GRAPH_NAME`, `LLM_API_KEY`, `LLM_MODEL`, `API_HOST`,
/// `API_PORT`, `CORS_ORIGINS`, `JWT_SECRET`, `LOG_LEVEL`, `DEBUG`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArborConfig {
    /// Directory holding the graph database file.
    #[serde(default = "default_graph_path")]
    pub graph_path: String,
    /// Graph name — becomes the database file stem.
    #[serde(default = "default_graph_name")]
    pub graph_name: String,
    /// LLM provider API key. Absent key switches the adapter to mock mode.
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Allowed CORS origins — a list, a JSON array string, or CSV.
    #[serde(
        default = "default_cors_origins",
        deserialize_with = "de_cors_origins"
    )]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub debug: bool,
}

impl Default for ArborConfig {
    fn default() -> Self {
        Self {
            graph_path: default_graph_path(),
            graph_name: default_graph_name(),
            llm_api_key: None,
            llm_model: default_llm_model(),
            api_host: default_api_host(),
            api_port: default_api_port(),
            cors_origins: default_cors_origins(),
            jwt_secret: default_jwt_secret(),
            log_level: default_log_level(),
            debug: false,
        }
    }
}

impl ArborConfig {
    /// Load config from a TOML file with flat env var overrides.
    ///
    /// Checks in order: explicit path argument, `ARBOR_CONFIG` env,
    /// `./arbor.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(|| std::env::var("ARBOR_CONFIG").unwrap_or_else(|_| "arbor.toml".into()));

        let config: ArborConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::raw().only(&[
                "GRAPH_PATH",
                "GRAPH_NAME",
                "LLM_API_KEY",
                "LLM_MODEL",
                "API_HOST",
                "API_PORT",
                "CORS_ORIGINS",
                "JWT_SECRET",
                "LOG_LEVEL",
                "DEBUG",
            ]))
            .extract()
            .map_err(|e| crate::error::ArborError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Full path of the graph database file: `{graph_path}/{graph_name}.db`.
    pub fn database_path(&self) -> String {
        format!("{}/{}.db", self.graph_path, self.graph_name)
    }
}

fn default_graph_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.arbor", home)
}
fn default_graph_name() -> String {
    "arbor".to_string()
}
fn default_llm_model() -> String {
    "gemini-2.0-flash-001".to_string()
}
fn default_api_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_api_port() -> u16 {
    DEFAULT_PORT
}
fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3432".to_string()]
}
fn default_jwt_secret() -> String {
    "dev-secret-key-change-in-production".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Accept `["a","b"]`, a JSON array string, or `"a,b"` CSV.
fn de_cors_origins<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct OriginsVisitor;

    impl<'de> serde::de::Visitor<'de> for OriginsVisitor {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a list of origins, a JSON array string, or a CSV string")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            let mut out = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                out.push(item);
            }
            Ok(out)
        }

        fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if let Ok(parsed) = serde_json::from_str::<Vec<String>>(s) {
                return Ok(parsed);
            }
            Ok(s.split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect())
        }
    }

    de.deserialize_any(OriginsVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ArborConfig::default();
        assert_eq!(cfg.api_port, 8432);
        assert!(cfg.llm_api_key.is_none());
        assert!(cfg.database_path().ends_with("/arbor.db"));
    }

    #[test]
    fn cors_origins_accepts_csv() {
        let cfg: ArborConfig = serde_json::from_value(serde_json::json!({
            "cors_origins": "http://a:1, http://b:2"
        }))
        .unwrap();
        assert_eq!(cfg.cors_origins, vec!["http://a:1", "http://b:2"]);
    }

    #[test]
    fn cors_origins_accepts_json_array_string() {
        let cfg: ArborConfig = serde_json::from_value(serde_json::json!({
            "cors_origins": "[\"http://a:1\"]"
        }))
        .unwrap();
        assert_eq!(cfg.cors_origins, vec!["http://a:1"]);
    }

    #[test]
    fn cors_origins_accepts_list() {
        let cfg: ArborConfig = serde_json::from_value(serde_json::json!({
            "cors_origins": ["http://a:1", "http://b:2"]
        }))
        .unwrap();
        assert_eq!(cfg.cors_origins.len(), 2);
    }
}
