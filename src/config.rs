//! Runtime settings.
//!
//! Sources, lowest priority first: built-in defaults, a project-local
//! `codeindex.toml`, environment variables, and finally CLI flags (applied by
//! the command layer). Invalid values are replaced by defaults with a warning.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CodeIndexError, Result};

pub const CONFIG_FILE: &str = "codeindex.toml";

pub const DEFAULT_CALLSITE_CAP: usize = 200;
pub const DEFAULT_MIN_LOC_FOR_SUMMARY: u32 = 20;
pub const DEFAULT_SUMMARY_CONCURRENCY: usize = 50;
pub const DEFAULT_SUMMARY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SUMMARY_RETRIES: u32 = 2;
pub const DEFAULT_SEARCH_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 30;

pub const ENV_FEATURE_DOCS_NODES_ENHANCED: &str = "CODEINDEX_FEATURE_DOCS_NODES_ENHANCED";
pub const ENV_ENRICH_LEGACY: &str = "CODEINDEX_ENRICH";
pub const ENV_CALLSITE_CAP: &str = "CODEINDEX_CALLSITE_CAP";
pub const ENV_SUMMARY_SCOPE: &str = "CODEINDEX_SUMMARY_SCOPE";
pub const ENV_SUMMARY_CONCURRENCY: &str = "CODEINDEX_SUMMARY_CONCURRENCY";
pub const ENV_SUMMARY_TIMEOUT: &str = "CODEINDEX_SUMMARY_TIMEOUT";
pub const ENV_SUMMARY_RETRIES: &str = "CODEINDEX_SUMMARY_RETRIES";
pub const ENV_LLM_MODEL: &str = "CODEINDEX_LLM_MODEL";
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";

/// Which nodes receive model-written summaries during a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SummaryScope {
    /// Files, classes and functions above the LOC threshold.
    Structured,
    /// File nodes only, from a compressed view of the whole file.
    Files,
    None,
}

impl SummaryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryScope::Structured => "structured",
            SummaryScope::Files => "files",
            SummaryScope::None => "none",
        }
    }

    /// Parses a scope name, falling back to `structured` with a warning.
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "structured" => SummaryScope::Structured,
            "files" => SummaryScope::Files,
            "none" => SummaryScope::None,
            other => {
                warn!("Unknown summary scope '{}'; falling back to 'structured'", other);
                SummaryScope::Structured
            }
        }
    }
}

impl From<String> for SummaryScope {
    fn from(raw: String) -> Self {
        Self::parse_or_default(&raw)
    }
}

impl From<SummaryScope> for String {
    fn from(scope: SummaryScope) -> Self {
        scope.as_str().to_string()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub build: BuildSettings,
    pub summary: SummarySettings,
    pub llm: LlmSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Emit function doc metadata and callsite records.
    pub enrich: bool,
    /// Callsite records kept per calling function. Non-positive values are
    /// replaced by the default.
    pub callsite_cap: i64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            enrich: false,
            callsite_cap: DEFAULT_CALLSITE_CAP as i64,
        }
    }
}

impl BuildSettings {
    pub fn callsite_cap(&self) -> usize {
        usize::try_from(self.callsite_cap)
            .ok()
            .filter(|&cap| cap > 0)
            .unwrap_or(DEFAULT_CALLSITE_CAP)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarySettings {
    /// Summarizer model, or `off`.
    pub model: String,
    pub scope: SummaryScope,
    pub min_loc: u32,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub retries: u32,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            model: "off".to_string(),
            scope: SummaryScope::Structured,
            min_loc: DEFAULT_MIN_LOC_FOR_SUMMARY,
            concurrency: DEFAULT_SUMMARY_CONCURRENCY,
            timeout_secs: DEFAULT_SUMMARY_TIMEOUT_SECS,
            retries: DEFAULT_SUMMARY_RETRIES,
        }
    }
}

impl SummarySettings {
    pub fn enabled(&self) -> bool {
        !self.model.eq_ignore_ascii_case("off") && self.scope != SummaryScope::None
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model used by guided search.
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_SEARCH_MODEL.to_string(),
            timeout_secs: DEFAULT_ORACLE_TIMEOUT_SECS,
        }
    }
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Settings {
    /// Loads `codeindex.toml` from the working directory when present, then
    /// applies environment overrides.
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        let mut settings = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Parses a settings file without environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut settings: Settings = toml::from_str(&content).map_err(|e| {
            CodeIndexError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        settings.normalize();
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // The feature flag wins over the legacy switch whenever it is set.
        if let Some(flag) = lookup(ENV_FEATURE_DOCS_NODES_ENHANCED) {
            self.build.enrich = truthy(&flag);
        } else if let Some(flag) = lookup(ENV_ENRICH_LEGACY) {
            self.build.enrich = truthy(&flag);
        }

        if let Some(raw) = lookup(ENV_CALLSITE_CAP).filter(|v| !v.trim().is_empty()) {
            match raw.trim().parse::<i64>() {
                Ok(cap) => self.build.callsite_cap = cap,
                Err(_) => {
                    warn!(
                        "invalid {}={}, falling back to {}",
                        ENV_CALLSITE_CAP, raw, DEFAULT_CALLSITE_CAP
                    );
                    self.build.callsite_cap = DEFAULT_CALLSITE_CAP as i64;
                }
            }
        }

        if let Some(scope) = lookup(ENV_SUMMARY_SCOPE).filter(|v| !v.trim().is_empty()) {
            self.summary.scope = SummaryScope::parse_or_default(&scope);
        }
        if let Some(n) = lookup(ENV_SUMMARY_CONCURRENCY).and_then(|v| v.trim().parse().ok()) {
            self.summary.concurrency = n;
        }
        if let Some(n) = lookup(ENV_SUMMARY_TIMEOUT).and_then(|v| v.trim().parse::<f64>().ok()) {
            if n > 0.0 {
                self.summary.timeout_secs = n.ceil() as u64;
            }
        }
        if let Some(n) = lookup(ENV_SUMMARY_RETRIES).and_then(|v| v.trim().parse().ok()) {
            self.summary.retries = n;
        }

        if let Some(model) = lookup(ENV_LLM_MODEL) {
            self.llm.model = model;
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            self.llm.endpoint = url;
        }

        self.normalize();
    }

    /// Replaces out-of-range values with defaults.
    pub fn normalize(&mut self) {
        if self.build.callsite_cap <= 0 {
            warn!(
                "{} must be positive, falling back to {}",
                ENV_CALLSITE_CAP, DEFAULT_CALLSITE_CAP
            );
            self.build.callsite_cap = DEFAULT_CALLSITE_CAP as i64;
        }
        if self.summary.concurrency == 0 {
            self.summary.concurrency = 1;
        }
    }

    /// Renders the default configuration as TOML.
    pub fn default_config_string() -> String {
        toml::to_string_pretty(&Settings::default()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(!settings.build.enrich);
        assert_eq!(settings.build.callsite_cap(), 200);
        assert_eq!(settings.summary.scope, SummaryScope::Structured);
        assert!(!settings.summary.enabled());
        assert_eq!(settings.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_feature_flag_overrides_legacy() {
        let mut settings = Settings::default();
        settings.apply_overrides_from(lookup(&[
            (ENV_FEATURE_DOCS_NODES_ENHANCED, "0"),
            (ENV_ENRICH_LEGACY, "1"),
        ]));
        assert!(!settings.build.enrich);

        let mut settings = Settings::default();
        settings.apply_overrides_from(lookup(&[(ENV_ENRICH_LEGACY, "yes")]));
        assert!(settings.build.enrich);
    }

    #[test]
    fn test_invalid_callsite_cap_falls_back() {
        for raw in ["abc", "0", "-5"] {
            let mut settings = Settings::default();
            settings.apply_overrides_from(lookup(&[(ENV_CALLSITE_CAP, raw)]));
            assert_eq!(settings.build.callsite_cap(), DEFAULT_CALLSITE_CAP, "raw={raw}");
        }
        let mut settings = Settings::default();
        settings.apply_overrides_from(lookup(&[(ENV_CALLSITE_CAP, "7")]));
        assert_eq!(settings.build.callsite_cap(), 7);
    }

    #[test]
    fn test_invalid_scope_falls_back() {
        let mut settings = Settings::default();
        settings.apply_overrides_from(lookup(&[(ENV_SUMMARY_SCOPE, "everything")]));
        assert_eq!(settings.summary.scope, SummaryScope::Structured);
        settings.apply_overrides_from(lookup(&[(ENV_SUMMARY_SCOPE, "FILES")]));
        assert_eq!(settings.summary.scope, SummaryScope::Files);
    }

    #[test]
    fn test_summary_tuning_and_credentials() {
        let mut settings = Settings::default();
        settings.apply_overrides_from(lookup(&[
            (ENV_SUMMARY_CONCURRENCY, "8"),
            (ENV_SUMMARY_TIMEOUT, "2.5"),
            (ENV_SUMMARY_RETRIES, "0"),
            (ENV_API_KEY, "sk-test"),
            (ENV_BASE_URL, "http://localhost:8080/v1"),
        ]));
        assert_eq!(settings.summary.concurrency, 8);
        assert_eq!(settings.summary.timeout_secs, 3);
        assert_eq!(settings.summary.retries, 0);
        assert_eq!(settings.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.llm.endpoint, "http://localhost:8080/v1");
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[build]\nenrich = true\ncallsite_cap = -1\n\n[summary]\nmodel = \"gpt-4o-mini\"\nscope = \"bogus\"\nmin_loc = 5\n",
        )
        .unwrap();
        let settings = Settings::from_file(&path).unwrap();
        assert!(settings.build.enrich);
        assert_eq!(settings.build.callsite_cap(), DEFAULT_CALLSITE_CAP);
        assert_eq!(settings.summary.scope, SummaryScope::Structured);
        assert_eq!(settings.summary.min_loc, 5);
        assert!(settings.summary.enabled());
        assert_eq!(settings.llm.model, DEFAULT_SEARCH_MODEL);
    }

    #[test]
    fn test_from_file_rejects_malformed_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[build\nenrich = ").unwrap();
        assert!(matches!(
            Settings::from_file(&path),
            Err(CodeIndexError::Config(_))
        ));
    }

    #[test]
    fn test_default_config_string_roundtrips() {
        let rendered = Settings::default_config_string();
        assert!(rendered.contains("callsite_cap = 200"));
        let parsed: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.summary.scope, SummaryScope::Structured);
    }
}
