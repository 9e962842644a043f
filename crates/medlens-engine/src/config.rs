//! Layered configuration loading using figment.
//!
//! Sources, highest priority first:
//! 1. Environment variables (`MEDLENS_*` prefix, `__` separates sections)
//! 2. The config file (`--config <path>`, else `medlens.toml` in the working directory)
//! 3. Built-in defaults
//!
//! API keys additionally fall back to their conventional names
//! (`GOOGLE_API_KEY`/`GEMINI_API_KEY`, `TAVILY_API_KEY`) when the
//! `MEDLENS_*` form is not set.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use medlens_contracts::models::DEFAULT_MODEL;
use medlens_contracts::prompts::Locale;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::preprocess::DEFAULT_MAX_OUTPUT_PIXELS;

pub const DEFAULT_CONFIG_FILE: &str = "medlens.toml";

const GEMINI_KEY_VARS: [&str; 2] = ["GOOGLE_API_KEY", "GEMINI_API_KEY"];
const SEARCH_KEY_VARS: [&str; 1] = ["TAVILY_API_KEY"];

fn default_gemini_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_search_api_base() -> String {
    "https://api.tavily.com".to_string()
}

const fn default_max_results() -> u32 {
    5
}

fn default_search_depth() -> String {
    "basic".to_string()
}

const fn default_max_tool_rounds() -> u32 {
    4
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}

const fn default_max_upload_bytes() -> u64 {
    20 * 1024 * 1024
}

const fn default_max_output_pixels() -> u64 {
    DEFAULT_MAX_OUTPUT_PIXELS
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_api_base")]
    pub api_base: String,

    #[serde(default)]
    pub api_key: String,

    /// Applied to every outbound request when set; otherwise the HTTP
    /// client's default applies.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl GeminiConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: default_gemini_api_base(),
            api_key: String::new(),
            request_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_api_base")]
    pub api_base: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_max_results")]
    pub max_results: u32,

    #[serde(default = "default_search_depth")]
    pub search_depth: String,

    /// Model/tool exchanges allowed before the model must answer.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
}

impl SearchConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_base: default_search_api_base(),
            api_key: String::new(),
            max_results: default_max_results(),
            search_depth: default_search_depth(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    #[serde(default)]
    pub locale: Locale,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Uploads whose 600 px wide rendition would exceed this are rejected.
    #[serde(default = "default_max_output_pixels")]
    pub max_output_pixels: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            locale: Locale::default(),
            default_model: default_model(),
            scratch_dir: None,
            max_output_pixels: default_max_output_pixels(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MedlensConfig {
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialStatus {
    pub search_enabled: bool,
}

impl MedlensConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config: Self = Self::figment(config_path).extract()?;
        config.apply_credential_fallbacks();
        Ok(config)
    }

    pub fn load_with_dotenv(config_path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::load(config_path)
    }

    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match config_path {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                let local_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local_path.exists() {
                    figment = figment.merge(Toml::file(local_path));
                }
            }
        }

        figment.merge(Env::prefixed("MEDLENS_").split("__"))
    }

    fn apply_credential_fallbacks(&mut self) {
        if !self.gemini.is_configured() {
            if let Some(key) = first_non_empty_env(&GEMINI_KEY_VARS) {
                self.gemini.api_key = key;
            }
        }
        if !self.search.is_configured() {
            if let Some(key) = first_non_empty_env(&SEARCH_KEY_VARS) {
                self.search.api_key = key;
            }
        }
    }

    /// Fails when the model key is missing. A missing search key, or zero
    /// tool rounds, only disables the search tool.
    pub fn credentials(&self) -> Result<CredentialStatus> {
        if !self.gemini.is_configured() {
            return Err(PipelineError::MissingCredential("GOOGLE_API_KEY"));
        }
        Ok(CredentialStatus {
            search_enabled: self.search.is_configured() && self.search.max_tool_rounds > 0,
        })
    }
}

fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        env::var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
