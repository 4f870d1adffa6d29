//! Grid environment discovery.
//!
//! The environment is loaded in order (later overrides earlier):
//! 1. `~/.config/gridrun/config.toml` (user defaults)
//! 2. `.gridrun.toml` in the working directory (project overrides)
//! 3. `GRIDRUN_*` environment variables
//!
//! Loading happens once per login attempt; the resolved value is passed by
//! reference to every primitive.

use std::path::Path;

use serde::Deserialize;

/// Default service port.
pub const DEFAULT_PORT: u16 = 2112;

/// The resolved session environment.
#[derive(Debug, Clone)]
pub struct GridEnv {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub zone: String,
    /// Home collection; relative request paths are qualified against it.
    pub home: String,
}

/// Partial environment as read from a config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GridEnvFile {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    zone: Option<String>,
    home: Option<String>,
}

impl GridEnvFile {
    fn load_file(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read config {}: {}", path.display(), e);
                return None;
            }
        };

        match toml::from_str(&content) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Failed to parse config {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge two partial environments (other overrides self where present).
    fn merge(self, other: Self) -> Self {
        GridEnvFile {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            user: other.user.or(self.user),
            zone: other.zone.or(self.zone),
            home: other.home.or(self.home),
        }
    }

    fn env_overrides(self) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        GridEnvFile {
            host: var("GRIDRUN_HOST").or(self.host),
            port: var("GRIDRUN_PORT")
                .and_then(|v| v.parse().ok())
                .or(self.port),
            user: var("GRIDRUN_USER").or(self.user),
            zone: var("GRIDRUN_ZONE").or(self.zone),
            home: var("GRIDRUN_HOME").or(self.home),
        }
    }

    fn resolve(self) -> GridEnv {
        let user = self
            .user
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "anonymous".to_owned());
        let zone = self.zone.unwrap_or_else(|| "main".to_owned());
        let home = self.home.unwrap_or_else(|| format!("/{zone}/home/{user}"));
        GridEnv {
            host: self.host.unwrap_or_else(|| "localhost".to_owned()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            user,
            zone,
            home,
        }
    }
}

impl GridEnv {
    /// Load the environment from config files and environment variables.
    pub fn load() -> GridEnv {
        let user_config = dirs::config_dir()
            .map(|d| d.join("gridrun/config.toml"))
            .and_then(|p| GridEnvFile::load_file(&p))
            .unwrap_or_default();
        let project_config =
            GridEnvFile::load_file(Path::new(".gridrun.toml")).unwrap_or_default();

        user_config.merge(project_config).env_overrides().resolve()
    }
}
