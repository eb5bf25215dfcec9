use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ArcPaths {
    pub home: PathBuf,
    pub config_file: PathBuf,
    pub logs_dir: PathBuf,
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

pub fn resolve_paths() -> Result<ArcPaths> {
    let home = match env::var("ARCPICS_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".arcpics"),
    };

    let config_file = env_or_default_path("ARCPICS_CONFIG_PATH", home.join("arcpics.toml"));
    let logs_dir = env_or_default_path("ARCPICS_LOGS_DIR", home.join("logs"));

    Ok(ArcPaths {
        home,
        config_file,
        logs_dir,
    })
}
