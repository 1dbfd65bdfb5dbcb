//! HTTP implementation of the backend protocol.
//!
//! Requests are form-encoded POSTs; responses are line-oriented text with
//! the protocol version in a response header. Parsing is kept in free
//! functions so the wire format can be tested without a server.

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::{Backend, BackendVersion, ConnectionParams, InitParams, SessionCreated, ShareListUpdate};
use crate::crypto;
use crate::error::{Error, Result};
use crate::location::Position;
use crate::session::{Session, ShareMode};
use crate::{VERSION, VERSION_HEADER};

/// URL path of the session creation endpoint.
const CREATE_PATH: &str = "api/create.php";
/// URL path of the location report endpoint.
const POST_PATH: &str = "api/post.php";
/// URL path of the share stop endpoint.
const STOP_PATH: &str = "api/stop.php";

/// First response line of every successful request.
const RESPONSE_OK: &str = "OK";

/// Version assumed for servers that do not send the version header.
const LEGACY_VERSION: &str = "1.0";

/// Backend client speaking the HTTP wire protocol.
#[derive(Debug, Clone, Default)]
pub struct HttpBackend;

impl HttpBackend {
    /// Create a new HTTP backend client.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn create_session(
        &self,
        params: &InitParams,
        salt: Option<&[u8]>,
    ) -> Result<SessionCreated> {
        let mode = ShareMode::Solo;
        let mut fields = vec![
            ("pwd", params.password.clone()),
            ("dur", params.duration.as_secs().to_string()),
            ("int", params.interval.as_secs().to_string()),
            ("mod", mode.index().to_string()),
            ("ado", "0".to_string()),
            ("e2e", if salt.is_some() { "1" } else { "0" }.to_string()),
        ];
        if let Some(username) = &params.username {
            fields.push(("usr", username.clone()));
        }
        if let Some(custom_id) = &params.custom_id {
            fields.push(("lid", custom_id.clone()));
        }
        if let Some(salt) = salt {
            fields.push(("salt", crypto::encode_salt(salt)));
        }

        let url = endpoint(&params.server_url, CREATE_PATH)?;
        let (lines, version) = send_form(&params.connection, url, &fields).await?;

        // The server can still refuse a mode it considers too new for
        // itself; only solo shares exist today, so this gate is inert.
        if let Some(required) = mode.min_backend_version() {
            if !version.is_at_least(&required) {
                return Err(Error::VersionIncompatible {
                    feature: format!("{mode} shares"),
                    required: required.to_string(),
                    actual: version.to_string(),
                });
            }
        }

        parse_create_response(&lines, &version)
    }

    async fn stop_share(&self, session: &Session, share_id: &str) -> Result<()> {
        let fields = vec![
            ("sid", session.session_id.clone()),
            ("lid", share_id.to_string()),
        ];
        let url = endpoint(&session.server_url, STOP_PATH)?;
        let (lines, _) = send_form(&session.connection, url, &fields).await?;
        parse_stop_response(&lines)
    }

    async fn post_location(
        &self,
        session: &Session,
        position: &Position,
    ) -> Result<ShareListUpdate> {
        let mut fields = vec![
            ("sid", session.session_id.clone()),
            ("lat", position.latitude.to_string()),
            ("lon", position.longitude.to_string()),
            ("time", format!("{:.3}", position.timestamp.timestamp_millis() as f64 / 1000.0)),
        ];
        if let Some(speed) = position.speed {
            fields.push(("spd", speed.to_string()));
        }
        if let Some(altitude) = position.altitude {
            fields.push(("alt", altitude.to_string()));
        }
        if let Some(accuracy) = position.accuracy {
            fields.push(("acc", accuracy.to_string()));
        }

        let url = endpoint(&session.server_url, POST_PATH)?;
        let (lines, version) = send_form(&session.connection, url, &fields).await?;
        parse_location_response(&lines, &version)
    }
}

/// Build a reqwest client honoring the session's transport parameters.
fn client_for(params: &ConnectionParams) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(params.timeout)
        .user_agent(format!("Waypost/{VERSION}"));
    if let Some(proxy) = &params.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }
    if params.accept_invalid_certs {
        builder = builder.danger_accept_invalid_certs(true);
    }
    Ok(builder.build()?)
}

/// Resolve an endpoint path against the configured server URL.
fn endpoint(server_url: &str, path: &str) -> Result<Url> {
    let mut base = server_url.trim_end_matches('/').to_string();
    base.push('/');
    let base = Url::parse(&base).map_err(|e| Error::InvalidUrl(format!("{server_url}: {e}")))?;
    base.join(path)
        .map_err(|e| Error::InvalidUrl(format!("{server_url}: {e}")))
}

/// POST a form and split the response into trimmed lines plus the version.
async fn send_form(
    connection: &ConnectionParams,
    url: Url,
    fields: &[(&str, String)],
) -> Result<(Vec<String>, BackendVersion)> {
    let client = client_for(connection)?;

    tracing::debug!(%url, "sending backend request");
    let response = client.post(url).form(fields).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Protocol(format!("unexpected HTTP status {status}")));
    }

    let version = response
        .headers()
        .get(VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| BackendVersion::new(LEGACY_VERSION), BackendVersion::new);

    let body = response.text().await?;
    let mut lines: Vec<String> = body.lines().map(|l| l.trim_end().to_string()).collect();
    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    tracing::debug!(version = %version, lines = lines.len(), "backend response received");
    Ok((lines, version))
}

/// Parse the response to a session creation request.
fn parse_create_response(lines: &[String], version: &BackendVersion) -> Result<SessionCreated> {
    expect_ok(lines)?;

    let session_id = lines
        .get(1)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| Error::Protocol("missing session ID".to_string()))?
        .clone();
    let view_url = lines
        .get(2)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| Error::Protocol("missing view URL".to_string()))?
        .clone();

    // Older backends identify a share only by its full URL.
    let view_id = if version.supports_view_id() {
        lines.get(3).filter(|l| !l.is_empty()).cloned()
    } else {
        None
    }
    .unwrap_or_else(|| view_url.clone());

    Ok(SessionCreated {
        session_id,
        view_url,
        view_id,
        backend_version: version.clone(),
    })
}

/// Parse the response to a location report.
fn parse_location_response(lines: &[String], version: &BackendVersion) -> Result<ShareListUpdate> {
    expect_ok(lines)?;

    if !version.supports_view_id() || lines.len() < 3 {
        return Ok(ShareListUpdate::default());
    }

    let link_format = lines[1].clone();
    let share_ids = lines[2]
        .split(',')
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    Ok(ShareListUpdate {
        link_format: Some(link_format),
        share_ids,
    })
}

/// Parse the response to a stop request.
fn parse_stop_response(lines: &[String]) -> Result<()> {
    expect_ok(lines)
}

/// Check the leading OK line shared by all responses.
fn expect_ok(lines: &[String]) -> Result<()> {
    match lines.first() {
        None => Err(Error::Protocol("empty response".to_string())),
        Some(first) if first == RESPONSE_OK => Ok(()),
        Some(_) => Err(Error::ServerRejected(lines.join("\n"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_create_response_legacy_backend_uses_url_as_id() {
        let response = lines(&["OK", "abc", "https://x/view/abc"]);
        let created = parse_create_response(&response, &BackendVersion::new("1.0")).unwrap();
        assert_eq!(created.session_id, "abc");
        assert_eq!(created.view_url, "https://x/view/abc");
        assert_eq!(created.view_id, "https://x/view/abc");
    }

    #[test]
    fn test_create_response_modern_backend_uses_view_id_line() {
        let response = lines(&["OK", "abc", "https://x/view/abc", "abc"]);
        let created = parse_create_response(&response, &BackendVersion::new("1.1")).unwrap();
        assert_eq!(created.view_id, "abc");
    }

    #[test]
    fn test_create_response_modern_backend_without_id_line_falls_back() {
        let response = lines(&["OK", "abc", "https://x/view/abc"]);
        let created = parse_create_response(&response, &BackendVersion::new("1.1")).unwrap();
        assert_eq!(created.view_id, "https://x/view/abc");
    }

    #[test]
    fn test_create_response_empty_is_protocol_error() {
        let err = parse_create_response(&[], &BackendVersion::new("1.1")).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_create_response_error_body_carries_server_message() {
        let response = lines(&["Incorrect password!"]);
        let err = parse_create_response(&response, &BackendVersion::new("1.1")).unwrap_err();
        match err {
            Error::ServerRejected(message) => assert!(message.contains("Incorrect password")),
            other => panic!("expected ServerRejected, got {other:?}"),
        }
    }

    #[test]
    fn test_create_response_truncated_is_protocol_error() {
        let response = lines(&["OK", "abc"]);
        let err = parse_create_response(&response, &BackendVersion::new("1.1")).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_location_response_parses_share_list() {
        let response = lines(&["OK", "https://x/?%s", "a1,b2,c3"]);
        let update = parse_location_response(&response, &BackendVersion::new("1.1")).unwrap();
        assert_eq!(update.link_format.as_deref(), Some("https://x/?%s"));
        assert_eq!(update.share_ids, ["a1", "b2", "c3"]);
    }

    #[test]
    fn test_location_response_legacy_backend_is_empty_update() {
        let response = lines(&["OK", "https://x/?%s", "a1"]);
        let update = parse_location_response(&response, &BackendVersion::new("1.0")).unwrap();
        assert_eq!(update, ShareListUpdate::default());
    }

    #[test]
    fn test_stop_response_ok() {
        assert!(parse_stop_response(&lines(&["OK"])).is_ok());
        assert!(parse_stop_response(&lines(&["Session expired"])).is_err());
    }

    #[test]
    fn test_endpoint_joins_with_and_without_trailing_slash() {
        let a = endpoint("https://h.example.com", CREATE_PATH).unwrap();
        let b = endpoint("https://h.example.com/", CREATE_PATH).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "https://h.example.com/api/create.php");

        let nested = endpoint("https://h.example.com/waypost", CREATE_PATH).unwrap();
        assert_eq!(nested.as_str(), "https://h.example.com/waypost/api/create.php");
    }
}
