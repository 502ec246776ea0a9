//! # W3C WebDriver Client
//!
//! Implements [`DeviceUiDriver`] over the W3C WebDriver HTTP protocol, so
//! any conforming driver (msedgedriver, chromedriver, geckodriver) can
//! drive the device's web interface.
//!
//! ## Endpoints
//!
//! | Method | Path (relative to `/session/{id}`) | Operation |
//! |--------|------------------------------------|-----------|
//! | POST   | `/session` (absolute)              | New session |
//! | POST   | `/url`                             | Navigate |
//! | POST   | `/refresh`                         | Reload |
//! | POST   | `/element`, `/elements`            | Find |
//! | GET    | `/element/{e}/displayed`           | Visibility |
//! | GET    | `/element/{e}/enabled`             | Enabled state |
//! | GET    | `/element/{e}/attribute/{name}`    | Attribute |
//! | POST   | `/element/{e}/click`               | Click |
//! | POST   | `/element/{e}/clear`               | Clear |
//! | POST   | `/element/{e}/value`               | Send keys |
//! | GET    | `/screenshot`                      | Screenshot (base64 PNG) |
//! | DELETE | (session itself)                   | End session |
//!
//! Reads and element lookups are repeated after a timed-out or dropped
//! exchange, but not after a refused connection: that means the driver
//! process has exited. Actions that change the page are sent once.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;

use devprov_core::{DeviceUiDriver, DriverError, ElementRef, Locator, ProvisionConfig};

/// Key under which W3C WebDriver serialises element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a07c-4a8c4b0c2d52";

/// The Enter key in WebDriver key-code space.
pub const ENTER_KEY: &str = "\u{E007}";

// -- Configuration ------------------------------------------------------------

/// Connection settings for a WebDriver endpoint.
#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    /// Base URL of the WebDriver server.
    pub endpoint: url::Url,
    /// `browserName` capability, if any.
    pub browser: Option<String>,
    /// Where screenshots are written.
    pub snapshot_dir: PathBuf,
    /// Interval between polls in the `wait_*` methods.
    pub poll_interval: Duration,
    /// Timeout for a single HTTP request.
    pub request_timeout: Duration,
}

impl WebDriverConfig {
    /// Settings derived from the provisioning configuration.
    pub fn from_provision(config: &ProvisionConfig) -> Result<Self, DriverError> {
        let endpoint = url::Url::parse(&config.webdriver_url).map_err(|e| {
            DriverError::Session(format!("invalid WebDriver URL {}: {e}", config.webdriver_url))
        })?;
        Ok(Self {
            endpoint,
            browser: config.browser.clone(),
            snapshot_dir: config.snapshot_dir.clone(),
            poll_interval: Duration::from_millis(250),
            request_timeout: Duration::from_secs(60),
        })
    }
}

// -- Wire types ---------------------------------------------------------------

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    value: Value,
}

#[derive(Deserialize)]
struct W3cError {
    error: String,
    #[serde(default)]
    message: String,
}

/// Map a W3C error code to a driver error.
pub fn map_w3c_error(code: &str, message: &str) -> DriverError {
    match code {
        "stale element reference" => DriverError::StaleElement(message.to_string()),
        "no such element" => DriverError::NoSuchElement(message.to_string()),
        "invalid session id" | "session not created" => {
            DriverError::Session(format!("{code}: {message}"))
        }
        _ => DriverError::Protocol(format!("{code}: {message}")),
    }
}

fn transport(e: reqwest::Error) -> DriverError {
    DriverError::Transport(e.to_string())
}

// -- Read Retries -------------------------------------------------------------

/// Sends of one read before its transport error is surfaced.
const READ_ATTEMPTS: u32 = 3;

/// Pause before the first repeat; doubled for each later one.
const READ_BACKOFF: Duration = Duration::from_millis(250);

/// Timeouts and dropped exchanges are worth another send; a refused
/// connection is not.
fn read_is_retryable(err: &reqwest::Error) -> bool {
    !err.is_connect() && (err.is_timeout() || err.is_request())
}

/// Send a read built by `send`, repeating it while the failure is
/// retryable and sends remain.
async fn send_read<F, Fut>(endpoint: &str, send: F) -> Result<reqwest::Response, DriverError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut backoff = READ_BACKOFF;
    let mut sent = 1;
    loop {
        match send().await {
            Ok(resp) => return Ok(resp),
            Err(e) if sent < READ_ATTEMPTS && read_is_retryable(&e) => {
                tracing::debug!(endpoint, sent, error = %e, "webdriver read failed; sending again in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                sent += 1;
            }
            Err(e) => {
                if e.is_connect() {
                    tracing::warn!(endpoint, "WebDriver endpoint refused the connection");
                }
                return Err(transport(e));
            }
        }
    }
}

async fn decode(resp: reqwest::Response) -> Result<Value, DriverError> {
    let status = resp.status();
    let text = resp.text().await.map_err(transport)?;
    if status.is_success() && text.trim().is_empty() {
        return Ok(Value::Null);
    }
    let envelope: Envelope = serde_json::from_str(&text).map_err(|e| {
        DriverError::Protocol(format!("HTTP {status}: undecodable response ({e})"))
    })?;
    if status.is_success() {
        return Ok(envelope.value);
    }
    match serde_json::from_value::<W3cError>(envelope.value) {
        Ok(err) => Err(map_w3c_error(&err.error, &err.message)),
        Err(_) => Err(DriverError::Protocol(format!("HTTP {status}: {text}"))),
    }
}

fn element_ref(value: &Value) -> Result<ElementRef, DriverError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementRef(id.to_string()))
        .ok_or_else(|| DriverError::Protocol(format!("not an element reference: {value}")))
}

/// File name for a snapshot taken under `label` at `at`.
pub fn snapshot_file_name(label: &str, at: chrono::DateTime<chrono::Utc>) -> String {
    let safe: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("{safe}_{}.png", at.format("%Y%m%d_%H%M%S"))
}

// -- Session ------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Readiness {
    Present,
    Visible,
    Clickable,
}

/// A live WebDriver session.
#[derive(Debug, Clone)]
pub struct WebDriverSession {
    http: reqwest::Client,
    session_url: String,
    session_id: String,
    snapshot_dir: PathBuf,
    poll_interval: Duration,
}

impl WebDriverSession {
    /// Create a new browser session.
    ///
    /// Calls `POST {endpoint}/session`. Not retried: a half-created session
    /// would leak a browser.
    pub async fn connect(config: WebDriverConfig) -> Result<Self, DriverError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(transport)?;
        let base = config.endpoint.as_str().trim_end_matches('/').to_string();

        let mut always_match = serde_json::Map::new();
        if let Some(browser) = &config.browser {
            always_match.insert("browserName".into(), json!(browser));
        }
        let body = json!({ "capabilities": { "alwaysMatch": always_match } });

        let resp = http
            .post(format!("{base}/session"))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let value = decode(resp).await.map_err(|e| match e {
            DriverError::Protocol(m) => DriverError::Session(m),
            other => other,
        })?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Protocol("new session response has no sessionId".into()))?
            .to_string();

        tracing::info!(session_id = %session_id, endpoint = %base, "WebDriver session created");
        Ok(Self {
            http,
            session_url: format!("{base}/session/{session_id}"),
            session_id,
            snapshot_dir: config.snapshot_dir,
            poll_interval: config.poll_interval,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    /// `GET`, repeated after retryable transport errors.
    async fn get(&self, path: &str) -> Result<Value, DriverError> {
        let url = format!("{}{path}", self.session_url);
        let endpoint = format!("GET {path}");
        tracing::debug!(endpoint = %endpoint, "webdriver request");
        let resp = send_read(&endpoint, || self.http.get(&url).send()).await?;
        decode(resp).await
    }

    /// `POST` of a read-only command, repeated after retryable transport
    /// errors.
    async fn query(&self, path: &str, body: &Value) -> Result<Value, DriverError> {
        let url = format!("{}{path}", self.session_url);
        let endpoint = format!("POST {path}");
        tracing::debug!(endpoint = %endpoint, "webdriver request");
        let resp = send_read(&endpoint, || self.http.post(&url).json(body).send()).await?;
        decode(resp).await
    }

    /// `POST` of a command that changes the page; sent once.
    async fn act(&self, path: &str, body: &Value) -> Result<Value, DriverError> {
        let url = format!("{}{path}", self.session_url);
        tracing::debug!(endpoint = %format!("POST {path}"), "webdriver request");
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        decode(resp).await
    }

    async fn find_one(&self, locator: &Locator) -> Result<ElementRef, DriverError> {
        let (using, value) = locator.to_w3c();
        let found = self
            .query("/element", &json!({ "using": using, "value": value }))
            .await?;
        element_ref(&found)
    }

    async fn flag(&self, element: &ElementRef, property: &str) -> Result<bool, DriverError> {
        let value = self
            .get(&format!("/element/{}/{property}", element.id()))
            .await?;
        value
            .as_bool()
            .ok_or_else(|| DriverError::Protocol(format!("{property} is not a boolean: {value}")))
    }

    async fn is_ready(&self, element: &ElementRef, readiness: Readiness) -> Result<bool, DriverError> {
        match readiness {
            Readiness::Present => Ok(true),
            Readiness::Visible => self.flag(element, "displayed").await,
            Readiness::Clickable => {
                Ok(self.flag(element, "displayed").await? && self.flag(element, "enabled").await?)
            }
        }
    }

    /// Poll until an element matching `locator` reaches `readiness`.
    async fn wait_for(
        &self,
        locator: &Locator,
        timeout: Duration,
        readiness: Readiness,
    ) -> Result<ElementRef, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            let lookup = match self.find_one(locator).await {
                Ok(element) => match self.is_ready(&element, readiness).await {
                    Ok(true) => return Ok(element),
                    Ok(false) => Ok(()),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            match lookup {
                Ok(()) | Err(DriverError::NoSuchElement(_)) | Err(DriverError::StaleElement(_)) => {}
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DriverError::Timeout {
                    locator: locator.to_string(),
                    after: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[async_trait]
impl DeviceUiDriver for WebDriverSession {
    async fn open(&self, url: &str) -> Result<(), DriverError> {
        self.act("/url", &json!({ "url": url })).await.map(drop)
    }

    async fn refresh(&self) -> Result<(), DriverError> {
        self.act("/refresh", &json!({})).await.map(drop)
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementRef>, DriverError> {
        let (using, value) = locator.to_w3c();
        let found = self
            .query("/elements", &json!({ "using": using, "value": value }))
            .await?;
        found
            .as_array()
            .ok_or_else(|| DriverError::Protocol(format!("elements is not an array: {found}")))?
            .iter()
            .map(element_ref)
            .collect()
    }

    async fn wait_clickable(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementRef, DriverError> {
        self.wait_for(locator, timeout, Readiness::Clickable).await
    }

    async fn wait_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementRef, DriverError> {
        self.wait_for(locator, timeout, Readiness::Visible).await
    }

    async fn wait_present(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementRef, DriverError> {
        self.wait_for(locator, timeout, Readiness::Present).await
    }

    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let value = self
            .get(&format!("/element/{}/attribute/{name}", element.id()))
            .await?;
        Ok(match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.act(&format!("/element/{}/click", element.id()), &json!({}))
            .await
            .map(drop)
    }

    async fn clear(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.act(&format!("/element/{}/clear", element.id()), &json!({}))
            .await
            .map(drop)
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), DriverError> {
        self.act(
            &format!("/element/{}/value", element.id()),
            &json!({ "text": text }),
        )
        .await
        .map(drop)
    }

    async fn submit_enter(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.type_text(element, ENTER_KEY).await
    }

    async fn snapshot(&self, label: &str) -> Result<(), DriverError> {
        let value = self.get("/screenshot").await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| DriverError::Protocol("screenshot is not a string".into()))?;
        let png = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DriverError::Protocol(format!("screenshot is not base64: {e}")))?;

        let path = self
            .snapshot_dir
            .join(snapshot_file_name(label, chrono::Utc::now()));
        tokio::fs::create_dir_all(&self.snapshot_dir)
            .await
            .map_err(|e| DriverError::Io(format!("{}: {e}", self.snapshot_dir.display())))?;
        tokio::fs::write(&path, png)
            .await
            .map_err(|e| DriverError::Io(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "snapshot saved");
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        tracing::debug!(session_id = %self.session_id, "ending WebDriver session");
        let resp = self
            .http
            .delete(&self.session_url)
            .send()
            .await
            .map_err(transport)?;
        decode(resp).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_w3c_codes_map_to_driver_errors() {
        assert!(matches!(
            map_w3c_error("stale element reference", "gone"),
            DriverError::StaleElement(_)
        ));
        assert!(matches!(
            map_w3c_error("no such element", "missing"),
            DriverError::NoSuchElement(_)
        ));
        assert!(matches!(
            map_w3c_error("invalid session id", "closed"),
            DriverError::Session(_)
        ));
        assert!(matches!(
            map_w3c_error("element click intercepted", "overlay"),
            DriverError::Protocol(_)
        ));
    }

    #[test]
    fn test_element_ref_reads_w3c_key() {
        let value = json!({ (ELEMENT_KEY): "abc-123" });
        assert_eq!(element_ref(&value).unwrap(), ElementRef("abc-123".into()));
        assert!(element_ref(&json!({ "ELEMENT": "legacy" })).is_err());
    }

    #[test]
    fn test_snapshot_names_are_filesystem_safe() {
        let at = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 14, 5, 9).unwrap();
        assert_eq!(
            snapshot_file_name("timeout_attempt_3", at),
            "timeout_attempt_3_20260301_140509.png"
        );
        assert_eq!(snapshot_file_name("a/b c", at), "a_b_c_20260301_140509.png");
    }

    #[tokio::test]
    async fn test_refused_read_is_sent_once() {
        let calls = AtomicU32::new(0);
        let http = reqwest::Client::new();

        let err = send_read("GET /status", || {
            calls.fetch_add(1, Ordering::SeqCst);
            // Nothing listens on port 1.
            http.get("http://127.0.0.1:1/status").send()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DriverError::Transport(_)), "{err}");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timed_out_read_is_sent_again() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;
        let calls = AtomicU32::new(0);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let url = format!("{}/status", server.uri());

        let err = send_read("GET /status", || {
            calls.fetch_add(1, Ordering::SeqCst);
            http.get(&url).send()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DriverError::Transport(_)), "{err}");
        assert_eq!(calls.load(Ordering::SeqCst), READ_ATTEMPTS);
    }

    #[test]
    fn test_config_rejects_bad_endpoint() {
        let mut cfg = ProvisionConfig::default();
        cfg.webdriver_url = "not a url".into();
        assert!(matches!(
            WebDriverConfig::from_provision(&cfg),
            Err(DriverError::Session(_))
        ));
    }
}
