// ============================================================================
// Clash API Types
// ============================================================================

use anyhow::{Context, Result};
use reqwest::{blocking::Response, Method};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use std::{collections::HashMap, fmt, thread, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Session;

#[derive(Debug, Deserialize)]
pub struct ProxiesResponse {
    pub proxies: HashMap<String, Proxy>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Proxy {
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: String,
    #[serde(default)]
    pub all: Vec<String>,
    #[serde(default)]
    pub now: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryItem>,
}

impl Proxy {
    pub fn is_group(&self) -> bool {
        matches!(self.proxy_type.as_str(), "Selector" | "URLTest" | "Fallback")
    }

    /// Last recorded delay. The daemon records failed probes as 0.
    pub fn last_delay(&self) -> Option<u32> {
        self.history.last().map(|h| h.delay).filter(|d| *d > 0)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryItem {
    #[serde(default)]
    pub delay: u32,
}

#[derive(Debug, Deserialize)]
pub struct RulesResponse {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rule {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub proxy: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VersionResponse {
    pub version: String,
    #[serde(default)]
    pub meta: bool,
}

impl VersionResponse {
    pub fn backend(&self) -> Backend {
        Backend::detect(&self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Clash,
    SingBox,
}

impl Backend {
    pub fn detect(version: &str) -> Self {
        if version.to_lowercase().contains("sing-box") {
            Backend::SingBox
        } else {
            Backend::Clash
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Clash => write!(f, "Clash"),
            Backend::SingBox => write!(f, "sing-box"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DelayResponse {
    delay: u32,
}

#[derive(Debug, Serialize)]
struct SelectProxyRequest<'a> {
    name: &'a str,
}

/// One frame of the `/traffic` stream, in bytes per second.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq)]
#[serde(default)]
pub struct Traffic {
    pub up: u64,
    pub down: u64,
}

/// One frame of the `/memory` stream.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq)]
#[serde(default)]
pub struct Memory {
    pub inuse: u64,
    pub oslimit: u64,
}

/// One frame of the `/logs` stream.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogEvent {
    #[serde(rename = "type", default)]
    pub level: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl LogEvent {
    pub fn payload_text(&self) -> String {
        match &self.payload {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectionsSnapshot {
    #[serde(rename = "downloadTotal", default)]
    pub download_total: u64,
    #[serde(rename = "uploadTotal", default)]
    pub upload_total: u64,
    #[serde(default, deserialize_with = "identified_connections")]
    pub connections: Vec<Connection>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Connection {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub metadata: ConnectionMetadata,
    #[serde(default)]
    pub upload: u64,
    #[serde(default)]
    pub download: u64,
    #[serde(default)]
    pub start: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub chains: Vec<String>,
    #[serde(default)]
    pub rule: String,
    #[serde(rename = "rulePayload", default)]
    pub rule_payload: String,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ConnectionMetadata {
    pub network: String,
    #[serde(rename = "type")]
    pub conn_type: String,
    #[serde(rename = "sourceIP")]
    pub source_ip: String,
    #[serde(rename = "destinationIP")]
    pub destination_ip: String,
    #[serde(rename = "sourcePort", deserialize_with = "string_or_number")]
    pub source_port: String,
    #[serde(rename = "destinationPort", deserialize_with = "string_or_number")]
    pub destination_port: String,
    pub host: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConfigResponse {
    #[serde(default)]
    pub mode: String,
    #[serde(rename = "port", default)]
    pub http_port: u16,
    #[serde(rename = "socks-port", default)]
    pub socks_port: u16,
    #[serde(rename = "mixed-port", default)]
    pub mixed_port: u16,
}

#[derive(Debug, Serialize)]
struct UpdateConfigRequest<'a> {
    mode: &'a str,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Entries without an id cannot be tracked across frames, so they are dropped.
fn identified_connections<'de, D>(deserializer: D) -> std::result::Result<Vec<Connection>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut list: Vec<Connection> = null_as_empty(deserializer)?;
    list.retain(|c| !c.id.is_empty());
    Ok(list)
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Next mode in the Rule -> Global -> Direct cycle.
pub fn next_mode(mode: &str) -> &'static str {
    match mode.to_lowercase().as_str() {
        "rule" => "global",
        "global" => "direct",
        _ => "rule",
    }
}

// ============================================================================
// Clash API Client
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

const RETRY_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct ClashClient {
    session: Session,
    retries: u32,
    client: reqwest::blocking::Client,
}

impl ClashClient {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            retries: 2,
            client: reqwest::blocking::Client::new(),
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn request(&self, method: Method, endpoint: &str) -> reqwest::blocking::RequestBuilder {
        let url = format!("{}{}", self.session.base_url, endpoint);
        let mut req = self.client.request(method, &url);
        if let Some(ref secret) = self.session.secret {
            req = req.header("Authorization", format!("Bearer {}", secret));
        }
        req
    }

    /// Sends a request, retrying transport failures and 5xx replies with a
    /// linear backoff. Any other non-success status is an `ApiError::Status`.
    fn send<B: Serialize>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
        retries: u32,
        timeout: Option<Duration>,
    ) -> std::result::Result<Response, ApiError> {
        let mut attempt = 0;
        loop {
            let mut req = self.request(method.clone(), endpoint);
            if let Some(body) = body {
                req = req.json(body);
            }
            if let Some(timeout) = timeout {
                req = req.timeout(timeout);
            }

            let err = match req.send() {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().is_server_error() && attempt < retries => {
                    ApiError::Status {
                        status: resp.status().as_u16(),
                        body: String::new(),
                    }
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().unwrap_or_default();
                    return Err(ApiError::Status { status, body });
                }
                Err(e) if attempt < retries => ApiError::Transport(e),
                Err(e) => return Err(e.into()),
            };

            attempt += 1;
            warn!(%method, endpoint, attempt, error = %err, "request failed, retrying");
            thread::sleep(RETRY_BACKOFF * attempt);
        }
    }

    fn get_json<T: DeserializeOwned>(&self, endpoint: &str, what: &str) -> Result<T> {
        let resp = self
            .send::<()>(Method::GET, endpoint, None, self.retries, None)
            .with_context(|| format!("Failed to fetch {}", what))?;
        resp.json::<T>()
            .with_context(|| format!("Failed to parse {} response", what))
    }

    pub fn get_proxies(&self) -> Result<ProxiesResponse> {
        self.get_json("/proxies", "proxies")
    }

    pub fn get_rules(&self) -> Result<RulesResponse> {
        self.get_json("/rules", "rules")
    }

    pub fn get_version(&self) -> Result<VersionResponse> {
        self.get_json("/version", "version")
    }

    pub fn get_config(&self) -> Result<ConfigResponse> {
        self.get_json("/configs", "config")
    }

    pub fn get_connections(&self) -> Result<ConnectionsSnapshot> {
        self.get_json("/connections", "connections")
    }

    pub fn switch_proxy(&self, group: &str, proxy: &str) -> Result<()> {
        let endpoint = format!("/proxies/{}", urlencoding::encode(group));
        self.send(
            Method::PUT,
            &endpoint,
            Some(&SelectProxyRequest { name: proxy }),
            self.retries,
            None,
        )
        .with_context(|| format!("Failed to select {} in {}", proxy, group))?;
        debug!(group, proxy, "switched proxy");
        Ok(())
    }

    pub fn close_connection(&self, id: &str) -> Result<()> {
        let endpoint = format!("/connections/{}", urlencoding::encode(id));
        self.send::<()>(Method::DELETE, &endpoint, None, self.retries, None)
            .context("Failed to close connection")?;
        Ok(())
    }

    pub fn close_all_connections(&self) -> Result<()> {
        self.send::<()>(Method::DELETE, "/connections", None, self.retries, None)
            .context("Failed to close connections")?;
        Ok(())
    }

    /// Probes one node. `None` means the daemon reported a timeout or error.
    /// Never retried: a failed probe is itself the answer.
    pub fn test_delay(&self, proxy: &str, url: &str, timeout_ms: u64) -> Result<Option<u32>> {
        let endpoint = format!(
            "/proxies/{}/delay?url={}&timeout={}",
            urlencoding::encode(proxy),
            urlencoding::encode(url),
            timeout_ms
        );
        let http_timeout = Duration::from_millis(timeout_ms) + Duration::from_secs(2);
        match self.send::<()>(Method::GET, &endpoint, None, 0, Some(http_timeout)) {
            Ok(resp) => {
                let delay: DelayResponse = resp.json().context("Failed to parse delay response")?;
                Ok(Some(delay.delay).filter(|d| *d > 0))
            }
            Err(ApiError::Status { .. }) => Ok(None),
            Err(e) => Err(e).context("Failed to test delay"),
        }
    }

    pub fn update_mode(&self, mode: &str) -> Result<()> {
        self.send(
            Method::PATCH,
            "/configs",
            Some(&UpdateConfigRequest { mode }),
            self.retries,
            None,
        )
        .context("Failed to update config")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::{BufRead, BufReader, Write},
        net::TcpListener,
    };

    /// Serves each canned `(status line, body)` pair to one connection, in order.
    fn serve(responses: Vec<(&'static str, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        format!("http://{}", addr)
    }

    const VERSION_OK: (&str, &str) = ("200 OK", r#"{"version":"sing-box 1.9.0","meta":true}"#);
    const UNAVAILABLE: (&str, &str) = ("503 Service Unavailable", "");
    const UNAUTHORIZED: (&str, &str) = ("401 Unauthorized", "Unauthorized");

    #[test]
    fn retries_server_errors_then_succeeds() {
        let base = serve(vec![UNAVAILABLE, VERSION_OK]);
        let client = ClashClient::new(Session::new(&base, None)).with_retries(2);
        let version = client.get_version().unwrap();
        assert_eq!(version.backend(), Backend::SingBox);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let base = serve(vec![UNAUTHORIZED]);
        let client = ClashClient::new(Session::new(&base, Some("bad".into())));
        let err = client.get_version().unwrap_err();
        match err.downcast_ref::<ApiError>() {
            Some(ApiError::Status { status, body }) => {
                assert_eq!(*status, 401);
                assert_eq!(body, "Unauthorized");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn backend_is_detected_from_version() {
        assert_eq!(Backend::detect("sing-box 1.8.0"), Backend::SingBox);
        assert_eq!(Backend::detect("Sing-Box v1"), Backend::SingBox);
        assert_eq!(Backend::detect("v1.18.1"), Backend::Clash);
    }

    #[test]
    fn mode_cycles_rule_global_direct() {
        assert_eq!(next_mode("Rule"), "global");
        assert_eq!(next_mode("global"), "direct");
        assert_eq!(next_mode("direct"), "rule");
        assert_eq!(next_mode("Unknown"), "rule");
    }

    #[test]
    fn connections_snapshot_tolerates_nulls_and_numeric_ports() {
        let raw = r#"{
            "downloadTotal": 10, "uploadTotal": 5, "connections": [{
                "id": "a", "upload": 1, "download": 2, "start": "2024-01-01T00:00:00Z",
                "chains": null, "rule": "Match",
                "metadata": {"network": "tcp", "type": "HTTP", "sourceIP": "10.0.0.1",
                             "sourcePort": 5000, "destinationIP": "1.1.1.1",
                             "destinationPort": "443", "host": "one.one"}
            }]
        }"#;
        let snap: ConnectionsSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snap.connections.len(), 1);
        let c = &snap.connections[0];
        assert!(c.chains.is_empty());
        assert_eq!(c.metadata.source_port, "5000");
        assert_eq!(c.metadata.destination_port, "443");

        let empty: ConnectionsSnapshot =
            serde_json::from_str(r#"{"downloadTotal":0,"uploadTotal":0,"connections":null}"#).unwrap();
        assert!(empty.connections.is_empty());
    }

    #[test]
    fn connection_without_id_does_not_break_the_frame() {
        let raw = r#"{"downloadTotal":0,"uploadTotal":0,"connections":[
            {"upload": 1, "metadata": {"host": "anon"}},
            {"id": "b", "upload": 2}
        ]}"#;
        let snap: ConnectionsSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snap.connections.len(), 1);
        assert_eq!(snap.connections[0].id, "b");
        assert_eq!(snap.connections[0].upload, 2);
    }

    #[test]
    fn failed_history_probe_counts_as_no_delay() {
        let proxy: Proxy = serde_json::from_str(
            r#"{"name":"HK","type":"Shadowsocks","history":[{"delay":120},{"delay":0}]}"#,
        )
        .unwrap();
        assert_eq!(proxy.last_delay(), None);
        assert!(!proxy.is_group());
    }
}
