//! Token lifecycle management
//!
//! Single authority for "give me a currently-valid access token": checks the
//! in-memory credential, then the optional disk cache, then performs a
//! refresh or password grant. A rejected refresh token falls back to the
//! password grant exactly once per call, which self-heals a stale cache
//! without retrying forever against a rejecting server.

use serde::{de, Deserialize};
use tokio::sync::Mutex;

use super::error::{AuthError, StoreError};
use super::token::{Credential, TokenStore};
use super::AuthSettings;

/// `expires_in` arrives as a bare integer or a stringified one depending on
/// the gateway in front of the token service.
fn string_or_u64<'de, D: de::Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("u64 or stringified u64")
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<u64, E> {
            Ok(v)
        }
        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<u64, E> {
            v.parse().map_err(E::custom)
        }
    }
    d.deserialize_any(Visitor)
}

#[derive(Debug, Deserialize)]
struct GrantResponse {
    access_token: String,
    refresh_token: String,
    #[serde(deserialize_with = "string_or_u64")]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct GrantErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Default)]
struct TokenState {
    credential: Option<Credential>,
    /// May outlive the access token it was issued with (server-side
    /// revocation hits the two independently).
    refresh_token: Option<String>,
}

/// Owns the current credential and the grant/retry policy around it.
pub struct TokenManager {
    settings: AuthSettings,
    store: TokenStore,
    http: reqwest::Client,
    state: Mutex<TokenState>,
}

impl TokenManager {
    pub fn new(settings: AuthSettings, store: TokenStore) -> Result<Self, AuthError> {
        // Redirects are classified manually per the retry policy, so the
        // client must not follow them on its own.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            settings,
            store,
            http,
            state: Mutex::new(TokenState::default()),
        })
    }

    /// Hand the manager a refresh token carried over from a previous session
    /// (ephemeral mode, where the disk cache is never consulted).
    pub async fn seed_refresh_token(&self, refresh_token: String) {
        let mut state = self.state.lock().await;
        state.refresh_token = Some(refresh_token);
    }

    /// Obtain a currently-valid access token.
    ///
    /// With `persist` the disk cache is consulted first and rewritten after
    /// every successful grant; without it the manager works purely from
    /// in-memory state.
    ///
    /// The internal lock is held for the whole call: concurrent callers are
    /// serialized so at most one grant exchange is in flight, and a waiter
    /// picks up the credential the first call produced.
    pub async fn get_token(&self, persist: bool) -> Result<Credential, AuthError> {
        let mut state = self.state.lock().await;

        if let Some(cred) = &state.credential {
            if !cred.is_expired() {
                return Ok(cred.clone());
            }
        }

        let mut refresh_token = state.refresh_token.clone();

        if persist && refresh_token.is_none() {
            match self.store.load() {
                Ok(cred) if !cred.is_expired() => {
                    tracing::debug!("Cached token still valid (expires_at={})", cred.expires_at);
                    state.refresh_token = Some(cred.refresh_token.clone());
                    state.credential = Some(cred.clone());
                    return Ok(cred);
                }
                Ok(cred) => {
                    tracing::info!("Cached token expired, renewing with its refresh token");
                    refresh_token = Some(cred.refresh_token);
                }
                Err(StoreError::NotFound) => {
                    tracing::debug!("No token cache at {}", self.store.path().display());
                }
                Err(e) => {
                    tracing::warn!("Token cache unreadable, requesting a fresh grant: {}", e);
                }
            }
        }

        let response = match refresh_token {
            Some(rt) => match self.request_grant(Some(&rt)).await {
                Ok(resp) => resp,
                Err(e) if e.retryable_as_password() => {
                    tracing::warn!("Refresh grant rejected ({}), retrying with password grant", e);
                    self.request_grant(None).await?
                }
                Err(e) => return Err(e),
            },
            None => self.request_grant(None).await?,
        };

        let credential = Credential::new(
            response.access_token,
            response.refresh_token,
            response.expires_in,
            self.settings.safety_margin_secs,
        );

        if persist {
            if let Err(e) = self.store.save(&credential) {
                tracing::warn!("Failed to persist token cache: {}", e);
            }
        }

        state.refresh_token = Some(credential.refresh_token.clone());
        state.credential = Some(credential.clone());
        Ok(credential)
    }

    /// Drop all credential state, in memory and on disk.
    pub async fn forget(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.credential = None;
        state.refresh_token = None;
        self.store.clear()
    }

    /// One grant exchange: refresh_token grant when a token is given,
    /// password grant otherwise. Follows at most `redirect_limit` redirects
    /// by reissuing against the Location target.
    async fn request_grant(&self, refresh_token: Option<&str>) -> Result<GrantResponse, AuthError> {
        let mut url = self.settings.token_url.clone();
        let mut redirects = 0u32;

        loop {
            let form: Vec<(&str, &str)> = match refresh_token {
                None => vec![
                    ("grant_type", "password"),
                    ("username", &self.settings.username),
                    ("password", &self.settings.password),
                    ("client_id", &self.settings.client_id),
                    ("scope", &self.settings.scope),
                    ("takeExclusiveSignOnControl", "true"),
                ],
                Some(rt) => vec![
                    ("grant_type", "refresh_token"),
                    ("username", &self.settings.username),
                    ("refresh_token", rt),
                ],
            };

            tracing::debug!(
                "Requesting {} grant from {}",
                if refresh_token.is_some() {
                    "refresh_token"
                } else {
                    "password"
                },
                url
            );

            let resp = self
                .http
                .post(&url)
                .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
                .header("Accept", "application/json")
                .form(&form)
                .send()
                .await?;

            let status = resp.status();

            if status.is_success() {
                let body = resp.text().await?;
                return Ok(serde_json::from_str(&body)?);
            }

            if matches!(status.as_u16(), 301 | 302 | 307 | 308) {
                redirects += 1;
                if redirects > self.settings.redirect_limit {
                    return Err(AuthError::RedirectLoop);
                }
                let location = resp
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(AuthError::RedirectLoop)?;
                tracing::warn!("Token endpoint moved, following redirect to {}", location);
                url = location.to_string();
                continue;
            }

            let body = resp.text().await.unwrap_or_default();
            let message = grant_error_message(&body);
            return Err(match status.as_u16() {
                400 | 401 => AuthError::CredentialsRejected {
                    status: status.as_u16(),
                    message,
                },
                403 | 451 => AuthError::Forbidden {
                    status: status.as_u16(),
                    message,
                },
                _ => AuthError::Unexpected {
                    status: status.as_u16(),
                    body,
                },
            });
        }
    }
}

/// Pull `error`/`error_description` out of a JSON error body, falling back
/// to the raw text.
fn grant_error_message(body: &str) -> String {
    match serde_json::from_str::<GrantErrorBody>(body) {
        Ok(parsed) => {
            let error = parsed.error.unwrap_or_default();
            match parsed.error_description {
                Some(desc) if !error.is_empty() => format!("{}: {}", error, desc),
                Some(desc) => desc,
                None if !error.is_empty() => error,
                None => body.to_string(),
            }
        }
        Err(_) => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};
    use std::time::{SystemTime, UNIX_EPOCH};
    use tempfile::TempDir;

    const TOKEN_PATH: &str = "/auth/oauth2/v1/token";

    fn unix_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn test_manager(server: &ServerGuard) -> (TokenManager, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = AuthSettings::new(
            "bot@example.com".to_string(),
            "hunter2".to_string(),
            "app-key".to_string(),
        )
        .with_token_url(format!("{}{}", server.url(), TOKEN_PATH));
        let store = TokenStore::new(dir.path().join("token.json"));
        let manager = TokenManager::new(settings, store).unwrap();
        (manager, dir)
    }

    fn expired_credential() -> Credential {
        Credential {
            access_token: "A".to_string(),
            refresh_token: "R".to_string(),
            expires_in: 3600,
            expires_at: unix_now() - 1,
        }
    }

    #[tokio::test]
    async fn test_valid_cache_makes_no_network_call() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .expect(0)
            .create_async()
            .await;

        let (manager, _dir) = test_manager(&server);
        let cached = Credential::new("A".to_string(), "R".to_string(), 600, 10);
        manager.store.save(&cached).unwrap();

        let cred = manager.get_token(true).await.unwrap();
        assert_eq!(cred.access_token, "A");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_cache_triggers_single_refresh_grant() {
        let mut server = Server::new_async().await;
        let refresh_mock = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "R".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"B","refresh_token":"R2","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let (manager, _dir) = test_manager(&server);
        manager.store.save(&expired_credential()).unwrap();

        let cred = manager.get_token(true).await.unwrap();
        assert_eq!(cred.access_token, "B");
        assert_eq!(cred.refresh_token, "R2");
        refresh_mock.assert_async().await;

        // Cache rewritten with the new record, expiry derived minus the margin
        let saved = manager.store.load().unwrap();
        assert_eq!(saved.access_token, "B");
        let expected = unix_now() + 3600 - 10;
        assert!(saved.expires_at >= expected - 2 && saved.expires_at <= expected + 2);
    }

    #[tokio::test]
    async fn test_second_call_reuses_credential() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::UrlEncoded("grant_type".into(), "password".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"B","refresh_token":"R2","expires_in":"600"}"#)
            .expect(1)
            .create_async()
            .await;

        let (manager, _dir) = test_manager(&server);
        let first = manager.get_token(true).await.unwrap();
        let second = manager.get_token(true).await.unwrap();
        assert_eq!(first, second);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_refresh_falls_back_to_password_once() {
        let mut server = Server::new_async().await;
        let refresh_mock = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error":"invalid_grant","error_description":"Refresh token does not exist."}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let password_mock = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::UrlEncoded("grant_type".into(), "password".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"C","refresh_token":"R3","expires_in":600}"#)
            .expect(1)
            .create_async()
            .await;

        let (manager, _dir) = test_manager(&server);
        manager.store.save(&expired_credential()).unwrap();

        let cred = manager.get_token(true).await.unwrap();
        assert_eq!(cred.access_token, "C");
        refresh_mock.assert_async().await;
        password_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_forbidden_password_grant_is_fatal() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .with_status(403)
            .with_body(r#"{"error":"access_denied"}"#)
            .expect(1)
            .create_async()
            .await;

        let (manager, _dir) = test_manager(&server);
        let err = manager.get_token(false).await.unwrap_err();
        assert!(matches!(err, AuthError::Forbidden { status: 403, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_redirect_is_followed_exactly_once() {
        let mut server = Server::new_async().await;
        let moved_mock = server
            .mock("POST", TOKEN_PATH)
            .with_status(308)
            .with_header("Location", &format!("{}/moved/token", server.url()))
            .expect(1)
            .create_async()
            .await;
        let target_mock = server
            .mock("POST", "/moved/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "password".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"B","refresh_token":"R2","expires_in":600}"#)
            .expect(1)
            .create_async()
            .await;

        let (manager, _dir) = test_manager(&server);
        let cred = manager.get_token(false).await.unwrap();
        assert_eq!(cred.access_token, "B");
        moved_mock.assert_async().await;
        target_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_second_consecutive_redirect_is_fatal() {
        let mut server = Server::new_async().await;
        let first_hop = server
            .mock("POST", TOKEN_PATH)
            .with_status(308)
            .with_header("Location", &format!("{}/moved/token", server.url()))
            .expect(1)
            .create_async()
            .await;
        let second_hop = server
            .mock("POST", "/moved/token")
            .with_status(308)
            .with_header("Location", &format!("{}/moved/again", server.url()))
            .expect(1)
            .create_async()
            .await;

        let (manager, _dir) = test_manager(&server);
        let err = manager.get_token(false).await.unwrap_err();
        assert!(matches!(err, AuthError::RedirectLoop));
        first_hop.assert_async().await;
        second_hop.assert_async().await;
    }

    #[tokio::test]
    async fn test_redirect_without_location_is_fatal() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .with_status(307)
            .expect(1)
            .create_async()
            .await;

        let (manager, _dir) = test_manager(&server);
        let err = manager.get_token(false).await.unwrap_err();
        assert!(matches!(err, AuthError::RedirectLoop));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_seeded_refresh_token_used_in_ephemeral_mode() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "carried-over".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"B","refresh_token":"R2","expires_in":600}"#)
            .expect(1)
            .create_async()
            .await;

        let (manager, dir) = test_manager(&server);
        manager.seed_refresh_token("carried-over".to_string()).await;

        let cred = manager.get_token(false).await.unwrap();
        assert_eq!(cred.access_token, "B");
        mock.assert_async().await;

        // Ephemeral mode never touches the cache file
        assert!(!dir.path().join("token.json").exists());
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_grant() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::UrlEncoded("grant_type".into(), "password".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"B","refresh_token":"R2","expires_in":600}"#)
            .expect(1)
            .create_async()
            .await;

        let (manager, _dir) = test_manager(&server);
        let (first, second) = tokio::join!(manager.get_token(false), manager.get_token(false));
        assert_eq!(first.unwrap().access_token, "B");
        assert_eq!(second.unwrap().access_token, "B");
        mock.assert_async().await;
    }

    #[test]
    fn test_grant_error_message_prefers_description() {
        let body = r#"{"error":"invalid_grant","error_description":"Refresh token does not exist."}"#;
        assert_eq!(
            grant_error_message(body),
            "invalid_grant: Refresh token does not exist."
        );
        assert_eq!(grant_error_message("plain text"), "plain text");
    }

    #[test]
    fn test_grant_response_accepts_stringified_expires_in() {
        let parsed: GrantResponse =
            serde_json::from_str(r#"{"access_token":"A","refresh_token":"R","expires_in":"600"}"#)
                .unwrap();
        assert_eq!(parsed.expires_in, 600);
    }
}
