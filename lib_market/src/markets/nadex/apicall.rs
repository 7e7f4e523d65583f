//! # Authentication & Session Negotiation
//!
//! Two HTTP collaborators run before the streaming connection opens:
//! authentication (which yields the security token from a response
//! header) and session creation (which returns a JS snippet naming the
//! session id, push host and phase). Both are fatal on failure at
//! bootstrap; there is no retry policy at this layer.

use std::sync::Mutex;

use regex::Regex;
use serde_json::json;

use crate::error::RelayError;
use crate::protocol::constants::SESSION_PHASE_OFFSET;
use crate::protocol::Session;

/// Device fingerprint the platform expects alongside every request.
const X_DEVICE_USER_AGENT: &str =
    "vendor=IG | applicationType=Nadex | platform=web | deviceType=phone | version=0.907.0+78b9f706";
/// Origin the platform validates requests against.
const PLATFORM_ORIGIN: &str = "https://platform.nadex.com";
const USER_AGENT: &str = "Mozilla/5.0";

/// Endpoint and credential configuration for the HTTP collaborators.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Authentication endpoint (POST, JSON credentials).
    pub auth_url: String,
    /// Lightstreamer `create_session.js` endpoint (POST, form).
    pub session_url: String,
    /// Full market hierarchy tree endpoint (GET).
    pub tree_url: String,
    /// Per-market navigation endpoint prefix (GET `<prefix>/<marketId>`).
    pub navigation_url: String,
    /// Account username for authentication.
    pub username: String,
    /// Account password for authentication.
    pub password: String,
    /// Account user id carried in subscription keys and session forms.
    pub user_id: String,
}

/// HTTP client for the pre-streaming collaborator calls. Holds the
/// security token between authentication and the calls that need it, so
/// no token state leaks into process-wide globals.
pub struct NadexApiClient {
    http: reqwest::Client,
    config: ApiConfig,
    token: Mutex<Option<String>>,
}

impl NadexApiClient {
    /// Creates a client for the configured endpoints.
    pub fn new(config: ApiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            token: Mutex::new(None),
        }
    }

    /// The configured account user id.
    pub fn user_id(&self) -> &str {
        &self.config.user_id
    }

    /// Authenticates and stores the security token for later calls.
    pub async fn authenticate(&self) -> Result<String, RelayError> {
        let response = self
            .http
            .post(&self.config.auth_url)
            .header("Accept", "application/json; charset=UTF-8")
            .header("Content-Type", "application/json; charset=UTF-8")
            .header("Origin", PLATFORM_ORIGIN)
            .header("User-Agent", USER_AGENT)
            .header("x-device-user-agent", X_DEVICE_USER_AGENT)
            .json(&json!({
                "username": self.config.username,
                "password": self.config.password,
            }))
            .send()
            .await?
            .error_for_status()?;

        let token = response
            .headers()
            .get("x-security-token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| RelayError::Auth("x-security-token header missing".to_string()))?;

        *self.token.lock().expect("token lock poisoned") = Some(token.clone());
        log::info!("authenticated as {}", self.config.user_id);
        Ok(token)
    }

    pub(crate) fn security_token(&self) -> Result<String, RelayError> {
        self.token
            .lock()
            .expect("token lock poisoned")
            .clone()
            .ok_or_else(|| RelayError::Auth("not authenticated".to_string()))
    }

    /// Negotiates a streaming session. The returned phase already carries
    /// the fixed start-of-session offset.
    pub async fn create_session(&self) -> Result<Session, RelayError> {
        let token = self.security_token()?;
        let password = format!("XST-{token}");
        let form = [
            ("LS_phase", "2301"),
            ("LS_cause", "new.api"),
            ("LS_polling", "true"),
            ("LS_polling_millis", "0"),
            ("LS_idle_millis", "0"),
            ("LS_client_version", "6.1"),
            ("LS_adapter_set", "InVisionProvider"),
            ("LS_user", self.config.user_id.as_str()),
            ("LS_password", password.as_str()),
            ("LS_container", "lsc"),
        ];

        let body = self
            .http
            .post(&self.config.session_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Origin", PLATFORM_ORIGIN)
            .header("Referer", format!("{PLATFORM_ORIGIN}/"))
            .header("User-Agent", USER_AGENT)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let (id, host, phase) = parse_session_body(&body)?;
        let session = Session {
            id,
            host,
            phase: phase + SESSION_PHASE_OFFSET,
        };
        log::info!(
            "session {} negotiated on {} (phase {})",
            session.id,
            session.host,
            session.phase
        );
        Ok(session)
    }

    pub(crate) async fn get_json(&self, url: &str) -> Result<serde_json::Value, RelayError> {
        let token = self.security_token()?;
        let value = self
            .http
            .get(url)
            .header("Accept", "application/json; charset=UTF-8")
            .header("Content-Type", "application/json; charset=UTF-8")
            .header("Origin", PLATFORM_ORIGIN)
            .header("Referer", format!("{PLATFORM_ORIGIN}/"))
            .header("User-Agent", USER_AGENT)
            .header("x-device-user-agent", X_DEVICE_USER_AGENT)
            .header("x-security-token", token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(value)
    }

    pub(crate) fn tree_url(&self) -> &str {
        &self.config.tree_url
    }

    pub(crate) fn navigation_url(&self, market_id: u64) -> String {
        format!("{}/{}", self.config.navigation_url, market_id)
    }
}

/// Extracts `(session id, host, raw phase)` from the `create_session.js`
/// response body.
pub fn parse_session_body(body: &str) -> Result<(String, String, u32), RelayError> {
    let start = Regex::new(r"start\('([^']+)',\s*'([^']+)'").expect("static regex");
    let set_phase = Regex::new(r"setPhase\((\d+)\);").expect("static regex");

    let captures = start
        .captures(body)
        .ok_or_else(|| RelayError::Session("no start(...) call in response".to_string()))?;
    let id = captures[1].to_string();
    let host = captures[2].to_string();

    let phase = set_phase
        .captures(body)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| RelayError::Session("no setPhase(...) call in response".to_string()))?;

    Ok((id, host, phase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_body_parses_the_js_snippet() {
        let body = concat!(
            "window.lsc = {};\n",
            "lsc.start('S7f9d2e81a4|b', 'push.demo-upd.example.com', 8080);\n",
            "lsc.setPhase(2301);\n",
        );
        let (id, host, phase) = parse_session_body(body).unwrap();
        assert_eq!(id, "S7f9d2e81a4|b");
        assert_eq!(host, "push.demo-upd.example.com");
        assert_eq!(phase, 2301);
    }

    #[test]
    fn missing_start_call_is_a_session_error() {
        let err = parse_session_body("alert('maintenance');").unwrap_err();
        assert!(matches!(err, RelayError::Session(_)));
    }

    #[test]
    fn missing_phase_is_a_session_error() {
        let err = parse_session_body("start('S1', 'host');").unwrap_err();
        assert!(matches!(err, RelayError::Session(_)));
    }
}
