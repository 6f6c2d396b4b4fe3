// ============================================================================
// Settings & Session
// ============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const APP_DIR: &str = "clashpanel";
pub const DEFAULT_DELAY_URL: &str = "http://www.gstatic.com/generate_204";

/// Persisted settings, stored as `config.toml` under the user config dir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Daemon external controller, e.g. `http://127.0.0.1:9090`.
    pub controller: Option<String>,
    pub secret: Option<String>,
    pub delay_url: String,
    pub delay_timeout_ms: u64,
    /// Level requested from the `/logs` stream.
    pub log_level: String,
    pub reconnect_delay_ms: u64,
    pub request_retries: u32,
    /// Samples kept for the traffic and memory charts.
    pub history_len: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            controller: None,
            secret: None,
            delay_url: DEFAULT_DELAY_URL.to_string(),
            delay_timeout_ms: 5000,
            log_level: "info".to_string(),
            reconnect_delay_ms: 2000,
            request_retries: 2,
            history_len: 60,
        }
    }
}

impl Settings {
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(dir.join(APP_DIR).join("config.toml"))
    }

    /// Missing file means defaults; a file that does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let raw = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, raw).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// The saved session, if a controller has been configured.
    pub fn session(&self) -> Option<Session> {
        self.controller
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(|c| Session::new(c, self.secret.clone()))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Where the daemon lives and how to authenticate against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub base_url: String,
    pub secret: Option<String>,
}

impl Session {
    pub fn new(controller: &str, secret: Option<String>) -> Self {
        let controller = controller.trim().trim_end_matches('/');
        let base_url = match crate::setup::scheme_re().find(controller) {
            Some(scheme) => format!(
                "{}{}",
                scheme.as_str().to_ascii_lowercase(),
                &controller[scheme.end()..]
            ),
            None => format!("http://{}", controller),
        };

        Self {
            base_url,
            secret: secret.filter(|s| !s.is_empty()),
        }
    }
}

pub fn data_dir() -> Result<PathBuf> {
    let dir = dirs::data_dir().context("Could not determine data directory")?;
    Ok(dir.join(APP_DIR))
}

pub fn log_dir() -> Result<PathBuf> {
    let dir = dirs::cache_dir().context("Could not determine cache directory")?;
    Ok(dir.join(APP_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.session().is_none());
    }

    #[test]
    fn save_then_load_keeps_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let settings = Settings {
            controller: Some("http://10.0.0.2:9090".into()),
            secret: Some("s3cret".into()),
            ..Settings::default()
        };
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        let session = loaded.session().unwrap();
        assert_eq!(session.base_url, "http://10.0.0.2:9090");
        assert_eq!(session.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "controller = \"127.0.0.1:9090\"\nhistory_len = 30\n").unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.history_len, 30);
        assert_eq!(loaded.delay_timeout_ms, 5000);
        assert_eq!(loaded.session().unwrap().base_url, "http://127.0.0.1:9090");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "controller = [").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn empty_secret_means_no_auth() {
        let session = Session::new("127.0.0.1:9090/", Some(String::new()));
        assert_eq!(session.base_url, "http://127.0.0.1:9090");
        assert!(session.secret.is_none());
    }

    #[test]
    fn host_starting_with_http_still_gets_a_scheme() {
        assert_eq!(
            Session::new("httpgw.lan:9090", None).base_url,
            "http://httpgw.lan:9090"
        );
        assert_eq!(
            Session::new("HTTPS://box.example:443", None).base_url,
            "https://box.example:443"
        );
    }
}
