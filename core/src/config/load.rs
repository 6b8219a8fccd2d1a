use std::path::{Path, PathBuf};

use anyhow::Context;

use super::types::AppConfig;

/// Get the weft data directory: `$WEFT_HOME`, else `~/.weft`.
pub fn get_weft_data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(v) = std::env::var("WEFT_HOME") {
        if !v.trim().is_empty() {
            return Ok(PathBuf::from(expand_path(&v)));
        }
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".weft"))
}

/// Expand `~` and environment variables; the input is returned unchanged if
/// expansion fails.
pub fn expand_path(raw: &str) -> String {
    shellexpand::full(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Load configuration.
///
/// Priority: `explicit` path, `<data dir>/config.toml`, `./weft.toml`,
/// built-in defaults. Environment variables override the file afterwards.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<AppConfig> {
    let mut cfg = match explicit {
        Some(path) => read_file(path)?,
        None => {
            let home_config = get_weft_data_dir()?.join("config.toml");
            let local_config = Path::new("weft.toml");
            if home_config.exists() {
                read_file(&home_config)?
            } else if local_config.exists() {
                read_file(local_config)?
            } else {
                AppConfig::default()
            }
        }
    };

    apply_env_overrides(&mut cfg)?;
    cfg.checkpoint.directory = expand_path(&cfg.checkpoint.directory);
    if let Some(dir) = cfg.logging.directory.as_mut() {
        *dir = expand_path(dir);
    }
    cfg.events_out.path = expand_path(&cfg.events_out.path);

    Ok(cfg)
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    load_config(None)
}

fn read_file(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str::<AppConfig>(&s).with_context(|| format!("Invalid config {}", path.display()))
}

fn apply_env_overrides(cfg: &mut AppConfig) -> anyhow::Result<()> {
    if let Ok(v) = std::env::var("WEFT_MAX_PARALLEL") {
        if !v.trim().is_empty() {
            let n: usize = v
                .trim()
                .parse()
                .with_context(|| format!("WEFT_MAX_PARALLEL must be a positive integer, got '{v}'"))?;
            cfg.executor.max_parallel = n.max(1);
        }
    }
    if let Ok(v) = std::env::var("WEFT_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.logging.level = v;
        }
    }
    if let Ok(v) = std::env::var("WEFT_CHECKPOINT_DIR") {
        if !v.trim().is_empty() {
            cfg.checkpoint.directory = v;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn explicit_path_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[executor]\nmax_parallel = 2\n\n[checkpoint]\ndirectory = \"/tmp/weft-cp\"").unwrap();

        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.checkpoint.directory, "/tmp/weft-cp");
        assert!(cfg.executor.max_parallel >= 1);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[executor\nmax_parallel = ").unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(load_config(Some(Path::new("/definitely/not/here.toml"))).is_err());
    }

    #[test]
    fn expand_path_handles_plain_paths() {
        assert_eq!(expand_path("/var/lib/weft"), "/var/lib/weft");
    }
}
