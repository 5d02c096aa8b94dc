use crate::error::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "dockhand.json";

/// Base dockhand config directory (universal ~/.config/dockhand/ on all platforms)
pub fn dockhand() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected("APPDATA environment variable not set on Windows")
        })?;
        Ok(PathBuf::from(appdata).join("dockhand"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected("HOME environment variable not set on Unix-like system")
        })?;
        Ok(PathBuf::from(home).join(".config").join("dockhand"))
    }
}

/// Global dockhand.json config file path
pub fn global_config() -> Result<PathBuf> {
    Ok(dockhand()?.join(CONFIG_FILE_NAME))
}

/// Locate the config file to load.
///
/// Order: explicit path, `./dockhand.json`, the global config. An explicit
/// path that does not exist is an error; the other two are optional.
pub fn resolve_config(explicit: Option<&Path>, cwd: &Path) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::config_missing_key(
                "config",
                Some(path.display().to_string()),
            )
            .with_hint("Pass an existing file to --config or drop the flag to use defaults"));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let local = cwd.join(CONFIG_FILE_NAME);
    if local.exists() {
        return Ok(Some(local));
    }

    match global_config() {
        Ok(global) if global.exists() => Ok(Some(global)),
        _ => Ok(None),
    }
}
