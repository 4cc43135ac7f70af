use crate::error::HubError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub max_workers: u64,
    pub space_multiplier: f64,
    pub progress_every: u64,
    #[serde(default)]
    pub skip_space_check: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            space_multiplier: 2.5,
            progress_every: 50,
            skip_space_check: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub commit_every: u64,
    pub snippet_max_chars: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            commit_every: 10,
            snippet_max_chars: 160,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HubConfig {
    pub extraction: ExtractionConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialHubConfig {
    extraction: Option<ExtractionConfig>,
    ingest: Option<IngestConfig>,
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn validate(cfg: &HubConfig) -> Result<(), HubError> {
    if cfg.extraction.max_workers == 0 {
        return Err(HubError::InvalidConfig(
            "extraction.max_workers must be >= 1".to_string(),
        ));
    }
    if !(cfg.extraction.space_multiplier >= 1.0) {
        return Err(HubError::InvalidConfig(
            "extraction.space_multiplier must be >= 1.0".to_string(),
        ));
    }
    if cfg.extraction.progress_every == 0 {
        return Err(HubError::InvalidConfig(
            "extraction.progress_every must be >= 1".to_string(),
        ));
    }
    if cfg.ingest.commit_every == 0 {
        return Err(HubError::InvalidConfig(
            "ingest.commit_every must be >= 1".to_string(),
        ));
    }
    if cfg.ingest.snippet_max_chars < 16 {
        return Err(HubError::InvalidConfig(
            "ingest.snippet_max_chars must be >= 16".to_string(),
        ));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("MESSAGEHUB_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".messagehub").join("config.toml"))
}

fn merge_file_config(base: &mut HubConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path).map_err(|err| {
        HubError::InvalidConfig(format!("failed to read {}: {err}", path.display()))
    })?;
    let parsed: PartialHubConfig = toml::from_str(&raw).map_err(|err| {
        HubError::InvalidConfig(format!("failed to parse {}: {err}", path.display()))
    })?;
    if let Some(extraction) = parsed.extraction {
        base.extraction = extraction;
    }
    if let Some(ingest) = parsed.ingest {
        base.ingest = ingest;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut HubConfig) {
    cfg.extraction.max_workers =
        env_or_u64("MESSAGEHUB_EXTRACT_WORKERS", cfg.extraction.max_workers);
    cfg.extraction.space_multiplier =
        env_or_f64("MESSAGEHUB_SPACE_MULTIPLIER", cfg.extraction.space_multiplier);
    cfg.extraction.progress_every =
        env_or_u64("MESSAGEHUB_PROGRESS_EVERY", cfg.extraction.progress_every);
    cfg.extraction.skip_space_check =
        env_or_bool("MESSAGEHUB_SKIP_SPACE_CHECK", cfg.extraction.skip_space_check);
    cfg.ingest.commit_every = env_or_u64("MESSAGEHUB_COMMIT_EVERY", cfg.ingest.commit_every);
    cfg.ingest.snippet_max_chars =
        env_or_u64("MESSAGEHUB_SNIPPET_MAX_CHARS", cfg.ingest.snippet_max_chars);
}

pub fn load_config() -> Result<HubConfig> {
    let mut cfg = HubConfig::default();
    merge_file_config(&mut cfg)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}
