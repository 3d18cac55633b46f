//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (nested keys use `__`, e.g. `APP_ENGINE__TOP_K=5`). Provides helpers to
//! expand `~` and `${VAR}` and to resolve relative paths against the
//! directory the configuration was loaded from.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::UnknownSymptomPolicy;

pub struct Config {
    figment: Figment,
    base_dir: PathBuf,
}

impl Config {
    /// Load from the current directory, picking the overlay file from `RUST_ENV`.
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_from(Path::new("."), &env_name)
    }

    pub fn load_from(dir: &Path, env_name: &str) -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::file(dir.join("config.toml")));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment, base_dir: dir.to_path_buf() };
        config.settings()?.validate()?;
        Ok(config)
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{}': {}", key, e)))
    }

    /// Typed view over every section; absent keys fall back to defaults.
    pub fn settings(&self) -> Result<Settings> {
        self.figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Resolve a configured path against the config directory.
    pub fn path<S: AsRef<str>>(&self, p: S) -> PathBuf {
        resolve_with_base(&self.base_dir, p)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub artifacts: ArtifactSettings,
    pub data: DataSettings,
    pub engine: EngineSettings,
    pub training: TrainingSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.engine.top_k == 0 {
            return Err(Error::InvalidConfig("engine.top_k must be at least 1".into()));
        }
        if self.training.n_estimators == 0 {
            return Err(Error::InvalidConfig("training.n_estimators must be at least 1".into()));
        }
        if self.training.min_samples_split < 2 {
            return Err(Error::InvalidConfig("training.min_samples_split must be at least 2".into()));
        }
        if self.training.max_depth == Some(0) {
            return Err(Error::InvalidConfig("training.max_depth must be positive when set".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    /// Directory holding `vocabulary.json`, `labels.json` and `classifier.json`.
    pub dir: String,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self { dir: "artifacts".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub treatment_table: String,
    pub history_log: String,
    pub training_dataset: String,
    pub supplementary_dataset: Option<String>,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            treatment_table: "data/treatment_data.csv".to_string(),
            history_log: "data/history.csv".to_string(),
            training_dataset: "data/smart_health_dataset.csv".to_string(),
            supplementary_dataset: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub top_k: usize,
    pub unknown_symptoms: UnknownSymptomPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { top_k: 3, unknown_symptoms: UnknownSymptomPolicy::Ignore }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub n_estimators: usize,
    pub seed: u64,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    /// Non-disease category removed from the dataset before fitting.
    pub excluded_label: String,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            n_estimators: 150,
            seed: 42,
            max_depth: None,
            min_samples_split: 2,
            excluded_label: "healthy".to_string(),
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
