use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};

use crate::poll::DEFAULT_QUESTION;
use crate::refresh::{DEFAULT_INTERVAL_MS, MAX_INTERVAL_MS, MIN_INTERVAL_MS};

/// Identity provider parameters
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// OIDC issuer, discovery is done relative to it
    pub authority: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub post_logout_redirect_uri: Option<String>,
    pub scope: String,
}

/// Everything the server needs, read once at startup and handed to each part
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base: String,
    pub poll_id: String,
    pub question: String,
    pub refresh_interval_ms: u64,
    /// Deadline for calls to the API; `None` leaves it to the transport
    pub http_timeout: Option<Duration>,
    pub identity: IdentityConfig,
    /// When unset the presenter controls are disabled
    pub presenter_token: Option<String>,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(var: F) -> anyhow::Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| var(key).ok_or_else(|| anyhow!("{} must be set", key));

        let api_base = required("API_BASE")?.trim_end_matches('/').to_string();

        let authority = match var("OIDC_AUTHORITY") {
            Some(a) => a,
            None => {
                let region = required("COGNITO_REGION")
                    .context("Set OIDC_AUTHORITY or the Cognito region and user pool")?;
                let pool = required("COGNITO_USER_POOL_ID")?;
                format!("https://cognito-idp.{}.amazonaws.com/{}", region, pool)
            }
        };

        let refresh_interval_ms = parse_or(&var, "REFRESH_INTERVAL_MS", DEFAULT_INTERVAL_MS)?;
        if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&refresh_interval_ms) {
            bail!(
                "REFRESH_INTERVAL_MS must be between {} and {}",
                MIN_INTERVAL_MS,
                MAX_INTERVAL_MS
            );
        }

        let http_timeout = match var("HTTP_TIMEOUT_MS") {
            Some(ms) => Some(Duration::from_millis(
                ms.parse().context("HTTP_TIMEOUT_MS must be a number")?,
            )),
            None => None,
        };

        Ok(Config {
            api_base,
            poll_id: var("POLL_ID").unwrap_or_else(|| "poll-1".to_string()),
            question: var("POLL_QUESTION").unwrap_or_else(|| DEFAULT_QUESTION.to_string()),
            refresh_interval_ms,
            http_timeout,
            identity: IdentityConfig {
                authority: authority.trim_end_matches('/').to_string(),
                client_id: required("COGNITO_CLIENT_ID")?,
                redirect_uri: required("REDIRECT_URI")?,
                post_logout_redirect_uri: var("POST_LOGOUT_REDIRECT_URI"),
                scope: var("OIDC_SCOPE").unwrap_or_else(|| "openid email profile".to_string()),
            },
            presenter_token: var("PRESENTER_TOKEN"),
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value: {}", key, v)),
        None => {
            log::info!("{} not set, using default", key);
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: [(&str, &str); 5] = [
        ("API_BASE", "https://api.example.com/prod/"),
        ("COGNITO_REGION", "eu-west-1"),
        ("COGNITO_USER_POOL_ID", "eu-west-1_abc"),
        ("COGNITO_CLIENT_ID", "client"),
        ("REDIRECT_URI", "http://localhost:8080/auth/callback"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&BASE)).unwrap();
        assert_eq!(config.api_base, "https://api.example.com/prod");
        assert_eq!(config.poll_id, "poll-1");
        assert_eq!(config.refresh_interval_ms, 1500);
        assert_eq!(config.http_timeout, None);
        assert_eq!(config.presenter_token, None);
        assert_eq!(
            config.identity.authority,
            "https://cognito-idp.eu-west-1.amazonaws.com/eu-west-1_abc"
        );
    }

    #[test]
    fn test_overrides() {
        let mut pairs = BASE.to_vec();
        pairs.extend([
            ("REFRESH_INTERVAL_MS", "3000"),
            ("HTTP_TIMEOUT_MS", "2500"),
            ("OIDC_AUTHORITY", "https://idp.example.com/"),
            ("PRESENTER_TOKEN", "secret"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.refresh_interval_ms, 3000);
        assert_eq!(config.http_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.identity.authority, "https://idp.example.com");
        assert_eq!(config.presenter_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid() {
        let pairs: Vec<_> = BASE.iter().filter(|(k, _)| *k != "API_BASE").copied().collect();
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = BASE.to_vec();
        pairs.push(("REFRESH_INTERVAL_MS", "0"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = BASE.to_vec();
        pairs.push(("REFRESH_INTERVAL_MS", "18446744073709551615"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = BASE.to_vec();
        pairs.push(("REFRESH_INTERVAL_MS", "soon"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }
}
