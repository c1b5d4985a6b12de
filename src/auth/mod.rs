//! Authentication against the RDP OAuth2 token service
//!
//! Implements the password + refresh_token grant pair used by the Messenger
//! bot platform: acquisition, proactive renewal before expiry, and an
//! optional single-file on-disk token cache.

pub mod error;
pub mod manager;
pub mod token;

pub use error::{AuthError, StoreError};
pub use manager::TokenManager;
pub use token::{Credential, TokenStore};

/// Default RDP token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://api.refinitiv.com/auth/oauth2/v1/token";

/// OAuth scope for the Messenger bot API
pub const MESSENGER_SCOPE: &str = "trapi.messenger";

/// Safety margin for REST callers: renew shortly before the server-side expiry.
pub const REST_SAFETY_MARGIN_SECS: u64 = 10;

/// Safety margin for streaming callers, where renewal must land well before
/// the transport-level session times out.
pub const STREAM_SAFETY_MARGIN_SECS: u64 = 30;

/// Settings for one token service session.
pub struct AuthSettings {
    pub token_url: String,
    pub username: String,
    pub password: String,
    /// Messenger account AppKey, sent as the OAuth client_id.
    pub client_id: String,
    /// Empty for the public clients the platform issues.
    pub client_secret: String,
    pub scope: String,
    /// Seconds subtracted from the reported validity when deriving expiry.
    pub safety_margin_secs: u64,
    /// Redirect responses followed per grant before treating it as a loop.
    pub redirect_limit: u32,
}

impl AuthSettings {
    pub fn new(username: String, password: String, client_id: String) -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_string(),
            username,
            password,
            client_id,
            client_secret: String::new(),
            scope: MESSENGER_SCOPE.to_string(),
            safety_margin_secs: REST_SAFETY_MARGIN_SECS,
            redirect_limit: 1,
        }
    }

    pub fn with_token_url(mut self, url: String) -> Self {
        self.token_url = url;
        self
    }

    pub fn with_safety_margin(mut self, secs: u64) -> Self {
        self.safety_margin_secs = secs;
        self
    }
}
