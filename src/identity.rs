//! Client side of the OpenID Connect provider.
//!
//! Sign-in is the authorization code flow with PKCE: the browser is sent to the
//! provider's authorization endpoint, comes back to the callback with a code,
//! and the code is exchanged for an id token. The id token is only read for its
//! profile claims and passed on as the bearer credential; verifying it is the
//! API gateway's job.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use url::Url;

use crate::config::IdentityConfig;
use crate::util;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Identity provider unavailable: {0}")]
    Discovery(String),
    #[error("Login failed: {0}")]
    Provider(String),
    #[error("Token exchange failed: {0}")]
    Exchange(String),
    #[error("The identity token could not be read")]
    InvalidToken,
    #[error("No login in progress for this session")]
    NoPendingLogin,
    #[error("Login response does not match the login request")]
    StateMismatch,
}

/// Endpoints published in `/.well-known/openid-configuration`
#[derive(Deserialize, Debug, Clone)]
pub struct Discovery {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub end_session_endpoint: Option<String>,
}

/// A sign-in redirect that has not come back yet
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub state: String,
    pub verifier: String,
    /// Where to send the browser once signed in
    pub return_to: String,
}

impl PendingLogin {
    pub fn new(return_to: impl Into<String>) -> PendingLogin {
        PendingLogin {
            state: util::random_token(16),
            verifier: util::random_token(32),
            return_to: return_to.into(),
        }
    }
}

/// Claims of the id token that the front-end uses
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub sub: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "cognito:username")]
    pub username: Option<String>,
    /// Expiry, seconds since the epoch
    pub exp: Option<i64>,
}

impl Profile {
    pub fn display_name(&self) -> &str {
        self.email
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id_token: String,
    pub profile: Profile,
}

impl User {
    pub fn from_id_token(id_token: String) -> Result<User, Error> {
        let profile = decode_claims(&id_token)?;
        Ok(User { id_token, profile })
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.profile.exp.map(|exp| exp <= now).unwrap_or(false)
    }
}

/// Reads the payload of a JWT without checking its signature
pub fn decode_claims(token: &str) -> Result<Profile, Error> {
    let payload = token.split('.').nth(1).ok_or(Error::InvalidToken)?;
    let bytes = util::decode_base64(payload).map_err(|_| Error::InvalidToken)?;
    serde_json::from_slice(&bytes).map_err(|_| Error::InvalidToken)
}

#[derive(Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenError {
    error: String,
    error_description: Option<String>,
}

pub struct IdentityClient {
    config: IdentityConfig,
    client: Client,
    discovery: OnceCell<Discovery>,
}

impl IdentityClient {
    pub fn new(config: IdentityConfig, timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(IdentityClient {
            config,
            client: builder.build()?,
            discovery: OnceCell::new(),
        })
    }

    /// Provider endpoints, fetched on first use and kept afterwards.
    /// A failed lookup is not cached.
    pub async fn discovery(&self) -> Result<&Discovery, Error> {
        self.discovery
            .get_or_try_init(|| async {
                let url = format!("{}/.well-known/openid-configuration", self.config.authority);
                log::info!("Discovering identity provider at {}", url);
                let res = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| Error::Discovery(e.to_string()))?;
                res.json::<Discovery>()
                    .await
                    .map_err(|e| Error::Discovery(e.to_string()))
            })
            .await
    }

    /// Where to send the browser to sign in
    pub async fn authorize_url(&self, login: &PendingLogin) -> Result<Url, Error> {
        let discovery = self.discovery().await?;
        Url::parse_with_params(
            &discovery.authorization_endpoint,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", self.config.scope.as_str()),
                ("state", login.state.as_str()),
                ("code_challenge", util::pkce_challenge(&login.verifier).as_str()),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| Error::Discovery(e.to_string()))
    }

    /// Trades the callback's code for the signed in user
    pub async fn exchange(&self, code: &str, login: &PendingLogin) -> Result<User, Error> {
        let discovery = self.discovery().await?;
        let res = self
            .client
            .post(&discovery.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.config.client_id.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("code_verifier", login.verifier.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Exchange(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let message = match res.json::<TokenError>().await {
                Ok(TokenError {
                    error_description: Some(d),
                    ..
                }) => d,
                Ok(TokenError { error, .. }) => error,
                Err(_) => format!("HTTP {}", status.as_u16()),
            };
            return Err(Error::Exchange(message));
        }

        let token = res
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::Exchange(e.to_string()))?
            .id_token
            .ok_or_else(|| Error::Exchange("no id_token in response".to_string()))?;
        User::from_id_token(token)
    }

    /// Where to send the browser after dropping its session, if the provider
    /// has an end-session endpoint
    pub async fn logout_url(&self, id_token: Option<&str>) -> Option<Url> {
        let discovery = match self.discovery().await {
            Ok(d) => d,
            Err(e) => {
                log::warn!("{}", e);
                return None;
            }
        };
        let endpoint = discovery.end_session_endpoint.as_deref()?;
        let mut url = Url::parse(endpoint).ok()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            if let Some(uri) = &self.config.post_logout_redirect_uri {
                query.append_pair("post_logout_redirect_uri", uri);
            }
            if let Some(token) = id_token {
                query.append_pair("id_token_hint", token);
            }
        }
        Some(url)
    }
}
