use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct HubPaths {
    pub hub_home: PathBuf,
    pub workspace: PathBuf,
    pub store_path: PathBuf,
    pub processed_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub inbox_dirs: Vec<PathBuf>,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

fn env_csv_paths(var: &str) -> Vec<PathBuf> {
    env::var(var)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

pub fn resolve_paths() -> Result<HubPaths> {
    let hub_home = match env::var("MESSAGEHUB_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join("MessageHub"),
    };

    let workspace = env_or_default_path("MESSAGEHUB_WORKSPACE", hub_home.join("data"));
    let store_path = env_or_default_path("MESSAGEHUB_DB", workspace.join("messagehub.db"));
    let logs_dir = env_or_default_path("MESSAGEHUB_LOGS_DIR", hub_home.join("logs"));
    let processed_dir = workspace.join(".processed");
    let inbox_dirs = env_csv_paths("MESSAGEHUB_INBOX_DIRS");

    Ok(HubPaths {
        hub_home,
        workspace,
        store_path,
        processed_dir,
        logs_dir,
        inbox_dirs,
    })
}
