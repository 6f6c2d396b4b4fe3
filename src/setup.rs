// ============================================================================
// First-run setup
// ============================================================================

use regex::Regex;
use std::{path::Path, sync::OnceLock};
use thiserror::Error;
use tracing::info;

use crate::{
    api::{ApiError, ClashClient, VersionResponse},
    config::{Session, Settings},
};

pub const DEFAULT_PORT: &str = "9090";

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Invalid URL. Example: http://127.0.0.1:9090")]
    InvalidUrl,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("{0}")]
    Connect(String),
    #[error("Failed to save settings: {0}")]
    Save(#[source] anyhow::Error),
}

pub(crate) fn scheme_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^https?://").expect("valid regex"))
}

fn port_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":\d+$").expect("valid regex"))
}

fn controller_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://[\w.-]+:\d+$").expect("valid regex"))
}

/// Turns user input such as `192.168.1.1` into `http://192.168.1.1:9090`.
pub fn normalize_controller(input: &str) -> Result<String, SetupError> {
    let trimmed = input.trim();
    let mut url = match scheme_re().find(trimmed) {
        Some(scheme) => format!(
            "{}{}",
            scheme.as_str().to_ascii_lowercase(),
            &trimmed[scheme.end()..]
        ),
        None => format!("http://{}", trimmed),
    };
    url = url.trim_end_matches('/').to_string();

    if !port_re().is_match(&url) {
        url.push(':');
        url.push_str(DEFAULT_PORT);
    }

    if controller_re().is_match(&url) {
        Ok(url)
    } else {
        Err(SetupError::InvalidUrl)
    }
}

/// Checks that the daemon answers `/version` with the given credentials.
pub fn probe(session: &Session) -> Result<VersionResponse, SetupError> {
    let client = ClashClient::new(session.clone()).with_retries(0);
    client.get_version().map_err(|err| {
        match err.downcast_ref::<ApiError>() {
            Some(ApiError::Status { status, body }) => SetupError::Http {
                status: *status,
                body: body.clone(),
            },
            _ => SetupError::Connect(format!("{:#}", err)),
        }
    })
}

/// Normalizes, probes and persists a controller. Returns the saved session.
pub fn bootstrap(
    input: &str,
    secret: &str,
    settings: &mut Settings,
    path: &Path,
) -> Result<(Session, VersionResponse), SetupError> {
    let base_url = normalize_controller(input)?;
    let secret = Some(secret.to_string()).filter(|s| !s.is_empty());
    let session = Session::new(&base_url, secret.clone());

    let version = probe(&session)?;

    settings.controller = Some(base_url);
    settings.secret = secret;
    settings.save(path).map_err(SetupError::Save)?;
    info!(controller = %session.base_url, version = %version.version, "saved controller");

    Ok((session, version))
}

/// Drops the saved controller and secret so the next start shows setup.
pub fn logout(settings: &mut Settings, path: &Path) -> anyhow::Result<()> {
    settings.controller = None;
    settings.secret = None;
    settings.save(path)?;
    info!("cleared saved controller");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_scheme_and_default_port() {
        assert_eq!(
            normalize_controller("127.0.0.1").unwrap(),
            "http://127.0.0.1:9090"
        );
        assert_eq!(
            normalize_controller("  router.lan/ ").unwrap(),
            "http://router.lan:9090"
        );
    }

    #[test]
    fn keeps_explicit_scheme_and_port() {
        assert_eq!(
            normalize_controller("https://box.example:443").unwrap(),
            "https://box.example:443"
        );
        assert_eq!(
            normalize_controller("HTTP://10.0.0.1:9097").unwrap(),
            "http://10.0.0.1:9097"
        );
    }

    #[test]
    fn trailing_slash_after_port_is_dropped() {
        assert_eq!(
            normalize_controller("http://127.0.0.1:9090/").unwrap(),
            "http://127.0.0.1:9090"
        );
        assert_eq!(
            normalize_controller("10.0.0.2:7890//").unwrap(),
            "http://10.0.0.2:7890"
        );
    }

    #[test]
    fn rejects_paths_and_garbage() {
        assert!(matches!(
            normalize_controller("http://host:9090/ui"),
            Err(SetupError::InvalidUrl)
        ));
        assert!(matches!(
            normalize_controller("not a host"),
            Err(SetupError::InvalidUrl)
        ));
        assert!(matches!(normalize_controller(""), Err(SetupError::InvalidUrl)));
    }

    #[test]
    fn unreachable_daemon_is_a_connect_error_and_nothing_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut settings = Settings::default();

        // Port 9 (discard) on localhost is reliably closed in test environments.
        let err = bootstrap("127.0.0.1:9", "", &mut settings, &path).unwrap_err();
        assert!(matches!(err, SetupError::Connect(_)));
        assert!(settings.controller.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn logout_clears_only_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut settings = Settings {
            controller: Some("http://10.0.0.2:9090".into()),
            secret: Some("s3cret".into()),
            history_len: 30,
            ..Settings::default()
        };
        settings.save(&path).unwrap();

        logout(&mut settings, &path).unwrap();
        assert!(settings.session().is_none());

        let loaded = Settings::load(&path).unwrap();
        assert!(loaded.controller.is_none());
        assert!(loaded.secret.is_none());
        assert!(loaded.session().is_none());
        assert_eq!(loaded.history_len, 30);
    }
}
