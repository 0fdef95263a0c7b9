//! Configuration and settings management
//!
//! Loads the interceptor valves from config files and environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Default upload endpoint
pub const DEFAULT_RAG_API_URL: &str = "http://localhost:8000/upload";

/// Scope entry that matches every pipeline
pub const WILDCARD_PIPELINE: &str = "*";

/// Interceptor configuration ("valves") consumed by the host framework
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Valves {
    /// Target pipeline ids this filter is connected to
    #[serde(
        default = "default_pipelines",
        deserialize_with = "deserialize_pipelines"
    )]
    pub pipelines: Vec<String>,

    /// Filter priority, lower runs first
    #[serde(default)]
    pub priority: i32,

    /// Upload endpoint for extracted files
    #[serde(default = "default_rag_api_url")]
    pub rag_api_url: String,

    /// Detect and log only, never upload
    #[serde(default)]
    pub dry_run: bool,

    /// Upload timeout in seconds; unset means no timeout
    #[serde(default)]
    pub upload_timeout_secs: Option<u64>,

    /// Human readable name used in lifecycle logs
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
}

fn default_pipelines() -> Vec<String> {
    vec![WILDCARD_PIPELINE.to_string()]
}

fn default_rag_api_url() -> String {
    DEFAULT_RAG_API_URL.to_string()
}

fn default_pipeline_name() -> String {
    "Attachment Interceptor".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PipelineList {
    List(Vec<String>),
    Joined(String),
}

fn deserialize_pipelines<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids = match PipelineList::deserialize(deserializer)? {
        PipelineList::List(ids) => ids,
        PipelineList::Joined(s) => split_ids(&s),
    };
    if ids.is_empty() {
        return Ok(default_pipelines());
    }
    Ok(ids)
}

fn split_ids(s: &str) -> Vec<String> {
    s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
        .collect()
}

impl Default for Valves {
    fn default() -> Self {
        Self {
            pipelines: default_pipelines(),
            priority: 0,
            rag_api_url: default_rag_api_url(),
            dry_run: false,
            upload_timeout_secs: None,
            pipeline_name: default_pipeline_name(),
        }
    }
}

impl Valves {
    /// Load valves from config files and the environment
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use attachment_interceptor::config::Valves;
    ///
    /// let valves = Valves::load().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a source is malformed or a value has the wrong type.
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked in
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `INTERCEPTOR__DRY_RUN=true` sets `dry_run`
            .add_source(
                Environment::with_prefix("INTERCEPTOR")
                    .separator("__")
                    .try_parsing(true),
            )
            // Bare names such as `RAG_API_URL`; empty values count as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?
            .try_deserialize()
    }

    /// Whether this filter is connected to the given pipeline id
    #[must_use]
    pub fn applies_to(&self, pipeline_id: &str) -> bool {
        self.pipelines
            .iter()
            .any(|p| p == WILDCARD_PIPELINE || p == pipeline_id)
    }

    /// Upload timeout, if one is configured
    #[must_use]
    pub fn upload_timeout(&self) -> Option<Duration> {
        self.upload_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_defaults() {
        let valves = Valves::default();
        assert_eq!(valves.pipelines, vec!["*".to_string()]);
        assert_eq!(valves.priority, 0);
        assert_eq!(valves.rag_api_url, "http://localhost:8000/upload");
        assert!(!valves.dry_run);
        assert!(valves.upload_timeout().is_none());
        assert_eq!(valves.pipeline_name, "Attachment Interceptor");
    }

    #[test]
    fn test_deserialize_partial_json_fills_defaults() -> Result<(), serde_json::Error> {
        let valves: Valves = serde_json::from_str(r#"{"dry_run": true, "priority": 3}"#)?;
        assert!(valves.dry_run);
        assert_eq!(valves.priority, 3);
        assert_eq!(valves.pipelines, vec!["*".to_string()]);
        assert_eq!(valves.rag_api_url, DEFAULT_RAG_API_URL);
        Ok(())
    }

    #[test]
    fn test_pipeline_list_parsing() -> Result<(), serde_json::Error> {
        let valves: Valves = serde_json::from_str(r#"{"pipelines": "gpt-4o, llama3;mistral"}"#)?;
        assert_eq!(valves.pipelines, vec!["gpt-4o", "llama3", "mistral"]);

        let valves: Valves = serde_json::from_str(r#"{"pipelines": ["a", "b"]}"#)?;
        assert_eq!(valves.pipelines, vec!["a", "b"]);

        let valves: Valves = serde_json::from_str(r#"{"pipelines": ""}"#)?;
        assert_eq!(valves.pipelines, vec!["*"]);
        Ok(())
    }

    #[test]
    fn test_applies_to() {
        let mut valves = Valves::default();
        assert!(valves.applies_to("anything"));

        valves.pipelines = vec!["gpt-4o".to_string()];
        assert!(valves.applies_to("gpt-4o"));
        assert!(!valves.applies_to("llama3"));
    }

    // Only test in this binary that touches the process environment
    #[test]
    fn test_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        env::set_var("INTERCEPTOR__RAG_API_URL", "https://rag.example.com/upload");
        env::set_var("INTERCEPTOR__DRY_RUN", "true");
        env::set_var("INTERCEPTOR__UPLOAD_TIMEOUT_SECS", "15");

        let valves = Valves::load()?;
        assert_eq!(valves.rag_api_url, "https://rag.example.com/upload");
        assert!(valves.dry_run);
        assert_eq!(valves.upload_timeout(), Some(Duration::from_secs(15)));

        env::remove_var("INTERCEPTOR__RAG_API_URL");
        env::remove_var("INTERCEPTOR__DRY_RUN");
        env::remove_var("INTERCEPTOR__UPLOAD_TIMEOUT_SECS");
        Ok(())
    }
}
