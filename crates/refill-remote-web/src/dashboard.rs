//! HTTP dashboard client
//!
//! Drives the dashboard with plain HTTP requests: a NextAuth credentials
//! login, cookie replay for the session, HTML scraping for the counter and a
//! JSON call for the reset. The session is kept across iterations and
//! rebuilt once whenever the dashboard stops recognizing it.

use async_trait::async_trait;
use refill_api::{ResetAck, UsageSnapshot};
use refill_config::DashboardConfig;
use refill_remote_api::{DashboardClient, RemoteError, RemoteResult};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::page::{PageParser, ResetControl, reset_succeeded, session_has_user};

/// Desktop Chrome, so the dashboard serves its regular markup
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Calls that need a logged-in session
#[derive(Debug, Clone, Copy)]
enum Call {
    DashboardPage,
    Reset,
}

struct Session {
    client: Client,
    authenticated: bool,
}

/// Dashboard client speaking plain HTTP
pub struct HttpDashboard {
    config: DashboardConfig,
    parser: PageParser,
    call_timeout: Duration,
    session: Mutex<Session>,
}

impl HttpDashboard {
    pub fn new(config: DashboardConfig, call_timeout: Duration) -> RemoteResult<Self> {
        let parser = PageParser::new(
            &config.usage_selector,
            &config.reset_button_keywords,
            &config.exhausted_markers,
        )?;
        let client = build_client(call_timeout)?;

        Ok(Self {
            config,
            parser,
            call_timeout,
            session: Mutex::new(Session {
                client,
                authenticated: false,
            }),
        })
    }

    /// Perform `call` with a valid session, logging in again once if the
    /// dashboard rejects the current one
    async fn authenticated(&self, call: Call) -> RemoteResult<String> {
        let mut session = self.session.lock().await;

        if !session.authenticated {
            self.login(&session.client).await?;
            session.authenticated = true;
        }

        match self.perform(&session.client, call).await {
            Err(e) if e.is_auth() => {
                warn!(error = %e, ?call, "Dashboard rejected the session, logging in again");
                session.authenticated = false;
                // Fresh cookie jar
                session.client = build_client(self.call_timeout)?;
                self.login(&session.client).await?;
                session.authenticated = true;
                self.perform(&session.client, call).await
            }
            other => other,
        }
    }

    async fn perform(&self, client: &Client, call: Call) -> RemoteResult<String> {
        match call {
            Call::DashboardPage => {
                let response = client
                    .get(&self.config.dashboard_url)
                    .send()
                    .await
                    .map_err(network_error)?;

                if response.url().path().contains("/login") {
                    return Err(RemoteError::Authentication(
                        "dashboard redirected to the login page".into(),
                    ));
                }
                let body = read_body(response).await?;
                if self.parser.is_login_page(&body) {
                    return Err(RemoteError::Authentication(
                        "dashboard answered with the login page".into(),
                    ));
                }
                Ok(body)
            }
            Call::Reset => {
                let response = client
                    .post(&self.config.reset_url)
                    .header(header::REFERER, &self.config.dashboard_url)
                    .header(header::ACCEPT, "application/json, text/plain, */*")
                    .json(&serde_json::json!({ "action": "reset" }))
                    .send()
                    .await
                    .map_err(network_error)?;
                read_body(response).await
            }
        }
    }

    /// NextAuth credentials flow
    async fn login(&self, client: &Client) -> RemoteResult<()> {
        let probe = get_text(client, &self.config.session_url).await?;
        if session_has_user(&probe) {
            debug!("Existing dashboard session is still valid");
            return Ok(());
        }

        info!(user = %self.config.username, "Logging in to dashboard");

        let login_page = get_text(client, &self.config.login_url).await?;
        let csrf_token = match self.parser.csrf_token(&login_page) {
            Some(token) => Some(token),
            None => {
                let csrf_url = format!("{}/api/auth/csrf", self.config.origin());
                match get_text(client, &csrf_url).await {
                    Ok(body) => self.parser.csrf_token(&body),
                    Err(e) => {
                        debug!(error = %e, "CSRF endpoint unavailable");
                        None
                    }
                }
            }
        };
        debug!(found = csrf_token.is_some(), "CSRF token lookup");

        let mut form = vec![
            ("username", self.config.username.clone()),
            ("password", self.config.password.expose().to_string()),
        ];
        if let Some(token) = csrf_token {
            form.push(("csrfToken", token));
        }
        form.push(("callbackUrl", self.config.dashboard_url.clone()));
        form.push(("json", "true".to_string()));

        let response = client
            .post(&self.config.credentials_url)
            .header(header::REFERER, &self.config.login_url)
            .form(&form)
            .send()
            .await
            .map_err(network_error)?;
        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(RemoteError::Authentication(format!(
                "credentials rejected (HTTP {})",
                status.as_u16()
            )));
        }
        debug!(status = status.as_u16(), "Credentials submitted");

        let session = get_text(client, &self.config.session_url).await?;
        if !session_has_user(&session) {
            return Err(RemoteError::Authentication(
                "login was not accepted (no user in session)".into(),
            ));
        }

        info!("Dashboard login succeeded");
        Ok(())
    }
}

#[async_trait]
impl DashboardClient for HttpDashboard {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_usage(&self) -> RemoteResult<UsageSnapshot> {
        let page = self.authenticated(Call::DashboardPage).await?;
        let (current, ceiling) = self.parser.usage(&page)?;
        Ok(UsageSnapshot::new(
            current,
            ceiling,
            refill_util::now().fixed_offset(),
        ))
    }

    async fn attempt_reset(&self) -> RemoteResult<ResetAck> {
        let page = self.authenticated(Call::DashboardPage).await?;

        match self.parser.reset_control(&page) {
            ResetControl::Exhausted { label } => {
                info!(button = %label, "Today's reset is already used");
                return Ok(ResetAck::AlreadyUsed);
            }
            ResetControl::Available {
                label,
                remaining,
                total,
            } => {
                debug!(button = %label, remaining, total, "Reset button available");
            }
            ResetControl::Unknown => {
                warn!("Reset button state not recognized, calling the reset endpoint anyway");
            }
        }

        let body = self.authenticated(Call::Reset).await?;
        if reset_succeeded(&body) {
            info!("Dashboard confirmed the reset");
            return Ok(ResetAck::Performed);
        }
        if self.parser.has_exhausted_marker(&body) {
            info!("Reset endpoint reports today's reset as used");
            return Ok(ResetAck::AlreadyUsed);
        }

        Err(RemoteError::ResetRejected(format!(
            "unexpected response: {}",
            truncate(&body, 200)
        )))
    }
}

fn build_client(call_timeout: Duration) -> RemoteResult<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE));

    Client::builder()
        .cookie_store(true)
        .user_agent(BROWSER_USER_AGENT)
        .default_headers(headers)
        .timeout(call_timeout)
        .connect_timeout(call_timeout)
        .build()
        .map_err(|e| RemoteError::Internal(format!("failed to create HTTP client: {}", e)))
}

async fn get_text(client: &Client, url: &str) -> RemoteResult<String> {
    let response = client.get(url).send().await.map_err(network_error)?;
    read_body(response).await
}

async fn read_body(response: reqwest::Response) -> RemoteResult<String> {
    let status = response.status();
    let url = response.url().to_string();

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(RemoteError::Authentication(format!(
            "{} answered HTTP {}",
            url,
            status.as_u16()
        )));
    }

    let body = response.text().await.map_err(network_error)?;
    if !status.is_success() {
        return Err(RemoteError::Network(format!(
            "{} answered HTTP {}: {}",
            url,
            status.as_u16(),
            truncate(&body, 200)
        )));
    }
    Ok(body)
}

fn network_error(e: reqwest::Error) -> RemoteError {
    RemoteError::Network(e.to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LOGIN_PAGE: &str = r#"
        <html><body>
          <form method="post">
            <input type="hidden" name="csrfToken" value="tok-123">
            <input type="text" name="username">
            <input type="password" name="password">
          </form>
        </body></html>
    "#;

    fn dashboard_page(counter: &str, button: &str) -> String {
        format!(
            r#"<html><body>
                 <div class="text-2xl font-bold text-primary">{counter}</div>
                 <button>{button}</button>
               </body></html>"#
        )
    }

    fn config_for(server: &MockServer) -> DashboardConfig {
        let toml = format!(
            r#"
            config_version = 1

            [dashboard]
            login_url = "{uri}/login"
            dashboard_url = "{uri}/dashboard"
            username = "me@example.com"
            password = "hunter2"
            "#,
            uri = server.uri()
        );
        refill_config::parse_config(&toml).unwrap().dashboard
    }

    async fn mount_login(server: &MockServer) {
        // First probe: not logged in. Afterwards: logged in.
        Mock::given(method("GET"))
            .and(path("/api/auth/session"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/session"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"user":{"email":"me@example.com"}}"#),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/callback/credentials"))
            .and(body_string_contains("csrfToken=tok-123"))
            .and(body_string_contains("username=me%40example.com"))
            .and(body_string_contains("json=true"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"url":"/dashboard"}"#))
            .expect(1)
            .mount(server)
            .await;
    }

    fn client_for(server: &MockServer) -> HttpDashboard {
        HttpDashboard::new(config_for(server), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn fetch_usage_logs_in_and_parses() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/dashboard"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(dashboard_page("18,881 / 20,000", "点击重置积分至上限 (1/1 次)")),
            )
            .mount(&server)
            .await;

        let dashboard = client_for(&server);
        let snapshot = dashboard.fetch_usage().await.unwrap();
        assert_eq!((snapshot.current, snapshot.ceiling), (18_881, 20_000));

        // Session is reused: still exactly one credentials POST
        let again = dashboard.fetch_usage().await.unwrap();
        assert_eq!(again.current, 18_881);
    }

    #[tokio::test]
    async fn reset_posts_when_available() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/dashboard"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(dashboard_page("300 / 20,000", "点击重置积分至上限 (1/1 次)")),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/reset-points"))
            .and(body_json(serde_json::json!({ "action": "reset" })))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"success":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        let dashboard = client_for(&server);
        assert_eq!(dashboard.attempt_reset().await.unwrap(), ResetAck::Performed);
    }

    #[tokio::test]
    async fn reset_is_skipped_when_used_up() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/dashboard"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(dashboard_page("20,000 / 20,000", "点击重置积分至上限 (0/1 次)")),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/reset-points"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dashboard = client_for(&server);
        assert_eq!(dashboard.attempt_reset().await.unwrap(), ResetAck::AlreadyUsed);
        assert_eq!(dashboard.attempt_reset().await.unwrap(), ResetAck::AlreadyUsed);
    }

    #[tokio::test]
    async fn reset_rejection_is_an_error() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/dashboard"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(dashboard_page("300 / 20,000", "点击重置积分至上限 (1/1 次)")),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/reset-points"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"success":false,"message":"try later"}"#),
            )
            .mount(&server)
            .await;

        let dashboard = client_for(&server);
        assert!(matches!(
            dashboard.attempt_reset().await,
            Err(RemoteError::ResetRejected(_))
        ));
    }

    #[tokio::test]
    async fn expired_session_logs_in_again() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/dashboard"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dashboard"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(dashboard_page("1,234 / 20,000", "重置积分 (1/1)")),
            )
            .mount(&server)
            .await;

        let dashboard = client_for(&server);
        let snapshot = dashboard.fetch_usage().await.unwrap();
        assert_eq!(snapshot.current, 1_234);
    }

    #[tokio::test]
    async fn rejected_login_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/session"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/callback/credentials"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let dashboard = client_for(&server);
        let err = dashboard.fetch_usage().await.unwrap_err();
        assert!(err.is_auth(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn server_error_is_a_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/session"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let dashboard = client_for(&server);
        assert!(matches!(
            dashboard.fetch_usage().await,
            Err(RemoteError::Network(_))
        ));
    }

    #[test]
    fn truncate_long_bodies() {
        assert_eq!(truncate("  short  ", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
