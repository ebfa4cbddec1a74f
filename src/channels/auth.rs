//! Mailbox credentials — static password or OAuth2 refresh-token grant.
//!
//! IMAP and SMTP both ask a [`TokenSource`] for a credential right before
//! they authenticate, so an expiring OAuth access token is refreshed on the
//! next (re)connect without any extra bookkeeping in the watch loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::env_lookup;
use crate::error::{ChannelError, ConfigError};

/// Google's token endpoint; any RFC 6749 endpoint works.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the provider-reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// A credential ready to authenticate with.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Plain password (IMAP LOGIN, SMTP PLAIN/LOGIN).
    Password(SecretString),
    /// OAuth2 bearer token (XOAUTH2).
    OAuthToken(SecretString),
}

impl Credential {
    pub fn secret(&self) -> &str {
        match self {
            Self::Password(s) | Self::OAuthToken(s) => s.expose_secret(),
        }
    }

    pub fn is_oauth(&self) -> bool {
        matches!(self, Self::OAuthToken(_))
    }
}

/// Hands out a currently valid credential for the mailbox account.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Account login name.
    fn username(&self) -> &str;

    /// Return a credential that is valid right now, refreshing if needed.
    async fn get_valid_token(&self) -> Result<Credential, ChannelError>;
}

/// Static username/password.
pub struct PasswordAuth {
    username: String,
    password: SecretString,
}

impl PasswordAuth {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

#[async_trait]
impl TokenSource for PasswordAuth {
    fn username(&self) -> &str {
        &self.username
    }

    async fn get_valid_token(&self) -> Result<Credential, ChannelError> {
        Ok(Credential::Password(self.password.clone()))
    }
}

struct CachedToken {
    token: SecretString,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth2 refresh-token grant with an in-memory access-token cache.
pub struct OAuthTokenSource {
    username: String,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    token_url: String,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuthTokenSource {
    pub fn new(
        username: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        refresh_token: SecretString,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            client_id: client_id.into(),
            client_secret,
            refresh_token,
            token_url: token_url.into(),
            http: reqwest::Client::new(),
            cached: Mutex::new(None),
        }
    }

    async fn refresh(&self) -> Result<CachedToken, ChannelError> {
        info!(user = %self.username, "Refreshing OAuth access token");
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("refresh_token", self.refresh_token.expose_secret()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::AuthFailed {
                name: "oauth".to_string(),
                reason: format!("token endpoint returned {status}: {body}"),
            });
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Http(format!("invalid token response: {e}")))?;

        let lifetime = Duration::from_secs(parsed.expires_in.unwrap_or(3600));
        debug!(expires_in = ?lifetime, "OAuth token refreshed");
        Ok(CachedToken {
            token: SecretString::from(parsed.access_token),
            expires_at: Instant::now() + lifetime,
        })
    }
}

/// Whether a token expiring at `expires_at` may still be used at `now`.
pub fn is_fresh(expires_at: Instant, now: Instant) -> bool {
    now + EXPIRY_MARGIN < expires_at
}

#[async_trait]
impl TokenSource for OAuthTokenSource {
    fn username(&self) -> &str {
        &self.username
    }

    async fn get_valid_token(&self) -> Result<Credential, ChannelError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && is_fresh(token.expires_at, Instant::now())
        {
            return Ok(Credential::OAuthToken(token.token.clone()));
        }

        let fresh = self.refresh().await?;
        let credential = Credential::OAuthToken(fresh.token.clone());
        *cached = Some(fresh);
        Ok(credential)
    }
}

/// Pick the auth mode from the environment: OAuth when a refresh token is
/// configured, otherwise a password.
pub fn token_source_from_env(username: &str) -> Result<Arc<dyn TokenSource>, ConfigError> {
    token_source_from_vars(username, env_lookup)
}

pub fn token_source_from_vars(
    username: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn TokenSource>, ConfigError> {
    if let Some(refresh_token) = lookup("EMAIL_OAUTH_REFRESH_TOKEN").filter(|s| !s.is_empty()) {
        let client_id = lookup("EMAIL_OAUTH_CLIENT_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_OAUTH_CLIENT_ID".to_string()))?;
        let client_secret = lookup("EMAIL_OAUTH_CLIENT_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_OAUTH_CLIENT_SECRET".to_string()))?;
        let token_url =
            lookup("EMAIL_OAUTH_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string());
        return Ok(Arc::new(OAuthTokenSource::new(
            username,
            client_id,
            SecretString::from(client_secret),
            SecretString::from(refresh_token),
            token_url,
        )));
    }

    let password = lookup("EMAIL_PASSWORD").ok_or_else(|| ConfigError::MissingRequired {
        key: "EMAIL_PASSWORD".to_string(),
        hint: "Set EMAIL_PASSWORD or the EMAIL_OAUTH_* variables".to_string(),
    })?;
    Ok(Arc::new(PasswordAuth::new(
        username,
        SecretString::from(password),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_respects_margin() {
        let now = Instant::now();
        assert!(is_fresh(now + Duration::from_secs(600), now));
        assert!(!is_fresh(now + Duration::from_secs(30), now));
        assert!(!is_fresh(now, now));
    }

    #[tokio::test]
    async fn password_auth_returns_password() {
        let auth = PasswordAuth::new("me@x.com", SecretString::from("pw"));
        let cred = auth.get_valid_token().await.unwrap();
        assert_eq!(cred.secret(), "pw");
        assert!(!cred.is_oauth());
        assert_eq!(auth.username(), "me@x.com");
    }

    #[test]
    fn env_prefers_oauth() {
        let source = token_source_from_vars("me@x.com", |key| match key {
            "EMAIL_OAUTH_REFRESH_TOKEN" => Some("r".to_string()),
            "EMAIL_OAUTH_CLIENT_ID" => Some("id".to_string()),
            "EMAIL_OAUTH_CLIENT_SECRET" => Some("s".to_string()),
            "EMAIL_PASSWORD" => Some("pw".to_string()),
            _ => None,
        });
        assert!(source.is_ok());
    }

    #[test]
    fn env_oauth_requires_client_id() {
        let source = token_source_from_vars("me@x.com", |key| match key {
            "EMAIL_OAUTH_REFRESH_TOKEN" => Some("r".to_string()),
            _ => None,
        });
        assert!(matches!(source, Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn env_without_any_secret_fails() {
        let source = token_source_from_vars("me@x.com", |_| None);
        assert!(matches!(source, Err(ConfigError::MissingRequired { .. })));
    }

    #[tokio::test]
    async fn password_source_from_env() {
        let source = token_source_from_vars("me@x.com", |key| {
            (key == "EMAIL_PASSWORD").then(|| "pw".to_string())
        })
        .unwrap();
        assert_eq!(source.get_valid_token().await.unwrap().secret(), "pw");
    }
}
