use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use alumnet_gateway::cache::CacheConfig;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "changeme",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Unset: badge changes are pushed to the user's own sockets.
    pub badge_webhook_url: Option<String>,
    pub cache: CacheConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("ALUMNET_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("ALUMNET_JWT_SECRET is unset or still a placeholder");
        }

        let port = match get("ALUMNET_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("ALUMNET_PORT is not a port number: {}", raw))?,
            None => 3000,
        };

        let ttl = |key: &str, default: u64| -> Result<Duration> {
            let secs = match get(key) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("{} is not a number of seconds: {}", key, raw))?,
                None => default,
            };
            Ok(Duration::from_secs(secs))
        };

        Ok(Self {
            host: get("ALUMNET_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("ALUMNET_DB_PATH")
                .unwrap_or_else(|| "alumnet.db".into())
                .into(),
            jwt_secret,
            badge_webhook_url: get("ALUMNET_BADGE_WEBHOOK_URL"),
            cache: CacheConfig {
                conversation_list_ttl: ttl("ALUMNET_CACHE_CONVERSATIONS_TTL_SECS", 10)?,
                messages_ttl: ttl("ALUMNET_CACHE_MESSAGES_TTL_SECS", 30)?,
                unread_counts_ttl: ttl("ALUMNET_CACHE_UNREAD_TTL_SECS", 30)?,
            },
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .with_context(|| format!("invalid listen address {}", addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(pairs: &[(&str, &str)]) -> Result<ServerConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let config = parse(&[("ALUMNET_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("alumnet.db"));
        assert_eq!(config.badge_webhook_url, None);
        assert_eq!(config.cache.conversation_list_ttl, Duration::from_secs(10));
        assert_eq!(config.cache.messages_ttl, Duration::from_secs(30));
        assert_eq!(config.cache.unread_counts_ttl, Duration::from_secs(30));
        assert_eq!(config.addr().unwrap().port(), 3000);
    }

    #[test]
    fn missing_or_placeholder_secrets_are_rejected() {
        assert!(parse(&[]).is_err());
        assert!(parse(&[("ALUMNET_JWT_SECRET", "  ")]).is_err());
        assert!(parse(&[("ALUMNET_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = parse(&[
            ("ALUMNET_JWT_SECRET", "a-real-secret"),
            ("ALUMNET_HOST", "127.0.0.1"),
            ("ALUMNET_PORT", "8080"),
            ("ALUMNET_DB_PATH", "/var/lib/alumnet/chat.db"),
            ("ALUMNET_BADGE_WEBHOOK_URL", "http://badges.internal/adjust"),
            ("ALUMNET_CACHE_MESSAGES_TTL_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(config.addr().unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(config.db_path, PathBuf::from("/var/lib/alumnet/chat.db"));
        assert_eq!(
            config.badge_webhook_url.as_deref(),
            Some("http://badges.internal/adjust")
        );
        assert_eq!(config.cache.messages_ttl, Duration::from_secs(5));
    }

    #[test]
    fn malformed_numbers_are_errors() {
        assert!(parse(&[("ALUMNET_JWT_SECRET", "s"), ("ALUMNET_PORT", "http")]).is_err());
        assert!(
            parse(&[
                ("ALUMNET_JWT_SECRET", "s"),
                ("ALUMNET_CACHE_UNREAD_TTL_SECS", "-1")
            ])
            .is_err()
        );
    }
}
