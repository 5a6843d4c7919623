// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Filesystem-backed `ConfigStore` for RankMatch (uses the platform config dir).

use directories::ProjectDirs;
use rankmatch_config::{ConfigError, ConfigStore};
use std::fs;
use std::path::PathBuf;

/// Store configs as TOML files under the platform config directory.
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// Create a store rooted at the user config directory (e.g., `~/.config/RankMatch`).
    pub fn new() -> Result<Self, ConfigError> {
        let proj = ProjectDirs::from("dev", "flyingrobots", "RankMatch")
            .ok_or_else(|| ConfigError::Other("could not resolve config dir".into()))?;
        let base = proj.config_dir().to_path_buf();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    /// Create a store rooted at an explicit directory, bypassing platform
    /// lookup. Used when `rankmatchd` is given a `--config-dir` override.
    pub fn at(base: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(format!("{key}.toml"))
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let path = self.path_for(key);
        match fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NotFound),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rankmatch_config::{ConfigService, MatchConfig};

    #[test]
    fn save_then_load_round_trips_on_disk() {
        let dir = std::env::temp_dir().join(format!(
            "rankmatch-config-fs-test-{}",
            std::process::id()
        ));
        let store = FsConfigStore::at(&dir).unwrap();
        let svc = ConfigService::new(store);

        let config = MatchConfig {
            partition_count: 7,
            ..MatchConfig::default()
        };
        svc.save("match", &config).unwrap();
        let loaded: Option<MatchConfig> = svc.load("match").unwrap();
        assert_eq!(loaded, Some(config));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_key_returns_not_found_from_store() {
        let dir = std::env::temp_dir().join(format!(
            "rankmatch-config-fs-test-missing-{}",
            std::process::id()
        ));
        let store = FsConfigStore::at(&dir).unwrap();
        assert!(matches!(store.load_raw("nope"), Err(ConfigError::NotFound)));
        let _ = fs::remove_dir_all(&dir);
    }
}
