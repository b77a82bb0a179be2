use std::io;
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use reqwest::{Client, Url};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tracing::{debug, info, warn};

use crate::credentials::ClientSecrets;
use crate::gmail::oauth::{
    AUTH_ENDPOINT, Credential, OAuthError, TOKEN_ENDPOINT, exchange_code_with_endpoint,
};

pub const CALLBACK_PATH: &str = "/oauth2callback";
pub const DEFAULT_AUTHORIZE_TIMEOUT: Duration = Duration::from_secs(300);

const SUCCESS_HTML: &str = r#"<!doctype html>
<html>
  <head><title>Gmail OAuth</title></head>
  <body style="font-family: sans-serif;">
    <h2>You can close this window</h2>
    <p>Return to the terminal to finish setup.</p>
  </body>
</html>
"#;

#[derive(Debug, Error)]
pub enum AuthorizeError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid authorization url: {0}")]
    InvalidUrl(String),
    #[error("timed out waiting for OAuth callback after {0} seconds")]
    TimedOut(u64),
    #[error("{0}")]
    Callback(String),
    #[error("code exchange failed: {0}")]
    OAuth(#[from] OAuthError),
}

/// Produces a fresh credential from the client secrets, typically by asking
/// the user for consent.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        secrets: &ClientSecrets,
        scopes: &[String],
    ) -> Result<Credential, AuthorizeError>;
}

/// Installed-app consent flow: loopback listener, browser, code exchange.
#[derive(Debug, Clone)]
pub struct InstalledAppFlow {
    http: Client,
    auth_endpoint: String,
    token_endpoint: String,
    timeout: Duration,
    open_browser: bool,
}

impl InstalledAppFlow {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            auth_endpoint: AUTH_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            timeout: DEFAULT_AUTHORIZE_TIMEOUT,
            open_browser: true,
        }
    }

    pub fn with_auth_endpoint(mut self, auth_endpoint: impl Into<String>) -> Self {
        self.auth_endpoint = auth_endpoint.into();
        self
    }

    pub fn with_token_endpoint(mut self, token_endpoint: impl Into<String>) -> Self {
        self.token_endpoint = token_endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_open_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    async fn complete_flow(
        &self,
        listener: TcpListener,
        secrets: &ClientSecrets,
        scopes: &[String],
        state: String,
    ) -> Result<Credential, AuthorizeError> {
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}{CALLBACK_PATH}");

        let auth_url = build_auth_url(
            &self.auth_endpoint,
            &secrets.client_id,
            &redirect_uri,
            scopes,
            &state,
        )?;

        if self.open_browser {
            info!("Opening browser for Google consent...");
            if let Err(err) = maybe_open_browser(auth_url.as_str()) {
                warn!("Could not open browser automatically: {err}. Please open the URL manually.");
            }
        }
        info!("If the browser did not open, visit this URL to authorize: {auth_url}");
        info!("Listening on {redirect_uri} for the OAuth callback");

        let code = match time::timeout(self.timeout, wait_for_code(listener, state)).await {
            Ok(result) => result?,
            Err(_) => return Err(AuthorizeError::TimedOut(self.timeout.as_secs())),
        };

        info!("Received authorization code, exchanging for tokens");
        let credential = exchange_code_with_endpoint(
            &self.http,
            &secrets.client_id,
            &secrets.client_secret,
            &code,
            &redirect_uri,
            &self.token_endpoint,
        )
        .await?;

        Ok(credential)
    }
}

#[async_trait]
impl Authorizer for InstalledAppFlow {
    async fn authorize(
        &self,
        secrets: &ClientSecrets,
        scopes: &[String],
    ) -> Result<Credential, AuthorizeError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        self.complete_flow(listener, secrets, scopes, random_state())
            .await
    }
}

pub fn build_auth_url(
    auth_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
) -> Result<Url, AuthorizeError> {
    let scope_value = scopes.join(" ");
    Url::parse_with_params(
        auth_endpoint,
        [
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope_value.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
            ("include_granted_scopes", "true"),
        ],
    )
    .map_err(|err| AuthorizeError::InvalidUrl(err.to_string()))
}

fn random_state() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Serve loopback connections until the OAuth redirect arrives. Empty
/// connections and requests for any other path are skipped.
async fn wait_for_code(
    listener: TcpListener,
    expected_state: String,
) -> Result<String, AuthorizeError> {
    loop {
        let (mut stream, _addr) = listener.accept().await?;
        let request = read_request_head(&mut stream).await?;
        if request.trim().is_empty() {
            continue;
        }

        let mut parts = request.lines().next().unwrap_or("").split_whitespace();
        let method = parts.next().unwrap_or("");
        let request_target = parts.next().unwrap_or("");

        let url = match Url::parse(&format!("http://localhost{request_target}")) {
            Ok(url) if url.path() == CALLBACK_PATH => url,
            _ => {
                debug!(request_target, "ignoring non-callback request");
                if let Err(err) = send_response(&mut stream, 404, "Not found").await {
                    debug!("failed to answer stray request: {err}");
                }
                continue;
            }
        };

        if method != "GET" {
            send_response(&mut stream, 405, "Only GET is supported").await?;
            return Err(AuthorizeError::Callback("Unexpected HTTP method".into()));
        }

        return handle_callback(&mut stream, &url, &expected_state).await;
    }
}

async fn read_request_head(stream: &mut TcpStream) -> Result<String, AuthorizeError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    // Read until the end of headers or 8 KiB.
    for _ in 0..16 {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > 8192 {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn handle_callback(
    stream: &mut TcpStream,
    url: &Url,
    expected_state: &str,
) -> Result<String, AuthorizeError> {
    let mut code: Option<String> = None;
    let mut state: Option<String> = None;
    let mut denied: Option<String> = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            "error" => denied = Some(value.to_string()),
            _ => {}
        }
    }

    if let Some(reason) = denied {
        send_response(stream, 400, "Authorization was not granted.").await?;
        return Err(AuthorizeError::Callback(format!(
            "Authorization denied: {reason}"
        )));
    }

    let code = match code {
        Some(code) if !code.is_empty() => code,
        _ => {
            send_response(
                stream,
                400,
                "Missing code in callback. Please retry the OAuth flow.",
            )
            .await?;
            return Err(AuthorizeError::Callback("Missing code in callback".into()));
        }
    };

    if state.as_deref() != Some(expected_state) {
        send_response(
            stream,
            400,
            "State mismatch, please retry the OAuth flow.",
        )
        .await?;
        return Err(AuthorizeError::Callback("State mismatch".into()));
    }

    send_response(stream, 200, SUCCESS_HTML).await?;
    Ok(code)
}

async fn send_response(stream: &mut TcpStream, status: u16, body: &str) -> io::Result<()> {
    let status_line = match status {
        200 => "200 OK",
        400 => "400 Bad Request",
        404 => "404 Not Found",
        405 => "405 Method Not Allowed",
        _ => "200 OK",
    };

    let response = format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await
}

fn maybe_open_browser(url: &str) -> io::Result<()> {
    #[cfg(target_os = "macos")]
    let mut command = Command::new("open");
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut command = Command::new("xdg-open");
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut cmd = Command::new("cmd");
        let escaped_url = url.replace('"', "\"\"");
        cmd.arg("/C").arg(format!("start \"\" \"{}\"", escaped_url));
        cmd
    };

    #[cfg(not(target_os = "windows"))]
    command.arg(url);
    command.spawn()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn secrets() -> ClientSecrets {
        ClientSecrets {
            client_id: "client".into(),
            client_secret: "secret".into(),
        }
    }

    async fn send_callback(addr: std::net::SocketAddr, request_line: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("{request_line}\r\nHost: localhost\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    #[test]
    fn build_auth_url_includes_expected_params() {
        let url = build_auth_url(
            AUTH_ENDPOINT,
            "client",
            "http://127.0.0.1:8080/oauth2callback",
            &["scope1".into(), "scope2".into()],
            "state123",
        )
        .expect("url builds");

        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("accounts.google.com"));
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params.get("client_id"), Some(&"client".to_string()));
        assert_eq!(
            params.get("redirect_uri"),
            Some(&"http://127.0.0.1:8080/oauth2callback".to_string())
        );
        assert_eq!(params.get("response_type"), Some(&"code".to_string()));
        assert_eq!(params.get("scope"), Some(&"scope1 scope2".to_string()));
        assert_eq!(params.get("state"), Some(&"state123".to_string()));
        assert_eq!(params.get("access_type"), Some(&"offline".to_string()));
        assert_eq!(params.get("prompt"), Some(&"consent".to_string()));
    }

    #[test]
    fn build_auth_url_rejects_bad_endpoint() {
        let err = build_auth_url("not a url", "client", "http://x", &[], "s")
            .expect_err("relative endpoint is invalid");
        assert!(matches!(err, AuthorizeError::InvalidUrl(_)));
    }

    #[test]
    fn random_state_is_urlsafe_and_correct_length() {
        let state = random_state();
        assert!(state.len() >= 43);
        let decoded = URL_SAFE_NO_PAD
            .decode(state.as_bytes())
            .expect("state decodes");
        assert_eq!(decoded.len(), 32);
    }

    #[tokio::test]
    async fn wait_for_code_returns_authorization_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let wait = tokio::spawn(wait_for_code(listener, "state".to_string()));

        let response = send_callback(
            addr,
            &format!("GET {CALLBACK_PATH}?code=abc&state=state HTTP/1.1"),
        )
        .await;
        assert!(response.contains("200 OK"));

        let code = wait.await.unwrap().expect("code returned");
        assert_eq!(code, "abc");
    }

    #[tokio::test]
    async fn wait_for_code_skips_stray_requests_before_callback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let wait = tokio::spawn(wait_for_code(listener, "s".to_string()));

        // A preconnect that closes without sending anything.
        drop(TcpStream::connect(addr).await.unwrap());

        let favicon = send_callback(addr, "GET /favicon.ico HTTP/1.1").await;
        assert!(favicon.contains("404 Not Found"));

        let response = send_callback(
            addr,
            &format!("GET {CALLBACK_PATH}?code=abc&state=s HTTP/1.1"),
        )
        .await;
        assert!(response.contains("200 OK"));

        let code = wait.await.unwrap().expect("code returned");
        assert_eq!(code, "abc");
    }

    #[tokio::test]
    async fn wait_for_code_rejects_state_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let wait = tokio::spawn(wait_for_code(listener, "expected".to_string()));

        let response = send_callback(
            addr,
            &format!("GET {CALLBACK_PATH}?code=abc&state=wrong HTTP/1.1"),
        )
        .await;
        assert!(response.contains("400 Bad Request"));

        let err = wait.await.unwrap().expect_err("state mismatch");
        assert!(err.to_string().contains("State mismatch"));
    }

    #[tokio::test]
    async fn wait_for_code_returns_error_for_missing_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let wait = tokio::spawn(wait_for_code(listener, "state".to_string()));

        let response =
            send_callback(addr, &format!("GET {CALLBACK_PATH}?state=state HTTP/1.1")).await;
        assert!(response.contains("400 Bad Request"));

        let err = wait.await.unwrap().expect_err("missing code");
        assert!(err.to_string().contains("Missing code"));
    }

    #[tokio::test]
    async fn wait_for_code_reports_denied_consent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let wait = tokio::spawn(wait_for_code(listener, "state".to_string()));

        let response = send_callback(
            addr,
            &format!("GET {CALLBACK_PATH}?error=access_denied&state=state HTTP/1.1"),
        )
        .await;
        assert!(response.contains("400 Bad Request"));

        let err = wait.await.unwrap().expect_err("denied");
        assert!(err.to_string().contains("access_denied"));
    }

    #[tokio::test]
    async fn wait_for_code_rejects_non_get() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let wait = tokio::spawn(wait_for_code(listener, "state".to_string()));

        let response = send_callback(
            addr,
            &format!("POST {CALLBACK_PATH}?code=abc&state=state HTTP/1.1"),
        )
        .await;
        assert!(response.contains("405 Method Not Allowed"));

        let err = wait.await.unwrap().expect_err("method mismatch");
        assert!(err.to_string().contains("Unexpected HTTP method"));
    }

    #[tokio::test]
    async fn complete_flow_exchanges_code_for_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=the-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "expires_in": 3600,
                "scope": "https://www.googleapis.com/auth/gmail.send",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let flow = InstalledAppFlow::new(Client::new())
            .with_token_endpoint(format!("{}/token", server.uri()))
            .with_open_browser(false);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let scopes = vec!["https://www.googleapis.com/auth/gmail.send".to_string()];

        let handle = tokio::spawn(async move {
            flow.complete_flow(listener, &secrets(), &scopes, "s1".to_string())
                .await
        });

        send_callback(
            addr,
            &format!("GET {CALLBACK_PATH}?code=the-code&state=s1 HTTP/1.1"),
        )
        .await;

        let credential = handle.await.unwrap().expect("flow completes");
        assert_eq!(credential.access_token, "access");
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(credential.client_id.as_deref(), Some("client"));
    }

    #[tokio::test]
    async fn complete_flow_times_out_without_callback() {
        let flow = InstalledAppFlow::new(Client::new())
            .with_open_browser(false)
            .with_timeout(Duration::from_millis(50));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let err = flow
            .complete_flow(listener, &secrets(), &[], "s".to_string())
            .await
            .expect_err("no callback arrives");

        assert!(matches!(err, AuthorizeError::TimedOut(_)));
    }
}
