use anyhow::Result;
use redzone_server::GameOptions;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::{fs, path::Path};
use tracing::warn;

const DEFAULT_CONFIG_PATH: &str = "config/server.toml";

/// Server configuration, loaded from a TOML file with CLI overrides on top.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind_addr: SocketAddr,
    /// Map seed; 0 means "pick one at startup".
    pub seed: u64,
    /// Whether players are downed (revivable) instead of dying outright.
    pub team_mode: bool,
    /// Base movement speed in world units per second.
    pub movement_speed: f32,
    /// Seconds after start during which joins are accepted.
    pub join_window_secs: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9870".parse().expect("static addr parses"),
            seed: 0,
            team_mode: false,
            movement_speed: 12.0,
            join_window_secs: 60.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the default path.
    pub fn load() -> Self {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<ServerConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    ServerConfig::default()
                }
            },
            Err(err) => {
                if path != Path::new(DEFAULT_CONFIG_PATH) {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                } else if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                }
                ServerConfig::default()
            }
        }
    }

    /// Save configuration to an explicit path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }

    /// Match parameters derived from this config.
    pub fn game_options(&self) -> GameOptions {
        GameOptions {
            seed: self.seed,
            team_mode: self.team_mode,
            movement_speed: self.movement_speed,
            join_window_secs: self.join_window_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = ServerConfig::load_from_path(Path::new("/nonexistent/server.toml"));
        assert_eq!(cfg.seed, 0);
        assert!(!cfg.team_mode);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let mut cfg = ServerConfig::default();
        cfg.seed = 99;
        cfg.team_mode = true;
        let dir = std::env::temp_dir().join("redzone-config-test");
        let path = dir.join("server.toml");
        cfg.save_to_path(&path).unwrap();
        let loaded = ServerConfig::load_from_path(&path);
        assert_eq!(loaded.seed, 99);
        assert!(loaded.team_mode);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn malformed_toml_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join("redzone-config-bad");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("server.toml");
        fs::write(&path, "seed = \"not a number\"").unwrap();
        let cfg = ServerConfig::load_from_path(&path);
        assert_eq!(cfg.seed, 0);
        let _ = fs::remove_dir_all(dir);
    }
}
