//! API server configuration.

use chrono::Duration;
use mercato_core::auth::jwt::{DEFAULT_ACCESS_TOKEN_TTL_SECS, resolve_jwt_secret};
use mercato_core::auth::refresh::{DEFAULT_REFRESH_TOKEN_TTL_SECS, TokenSettings};
use mercato_core::payment::PaymentConfig;

use crate::middleware::rate_limit::RateLimitConfig;

/// Currency charged when `PAYMENT_CURRENCY` is unset.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    /// JWT signing secret.
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    /// ISO currency code passed to the payment provider.
    pub currency: String,
    pub rate_limit: RateLimitConfig,
    pub payment: PaymentConfig,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                    | Default                                |
    /// |-----------------------------|----------------------------------------|
    /// | `BIND_ADDR`                 | `127.0.0.1:3100`                       |
    /// | `DATABASE_URL`              | `postgres://localhost:5432/mercato`    |
    /// | `JWT_SECRET`                | generated per process                  |
    /// | `ACCESS_TOKEN_EXP_SECONDS`  | `86400`                                |
    /// | `REFRESH_TOKEN_EXP_SECONDS` | `2592000`                              |
    /// | `PAYMENT_CURRENCY`          | `USD`                                  |
    /// | `RATE_LIMIT_PER_SECOND`     | `10`                                   |
    /// | `RATE_LIMIT_BURST`          | `20`                                   |
    /// | `RATE_LIMIT_TRUST_FORWARDED_FOR` | `false`                           |
    ///
    /// Payment provider variables are read by [`PaymentConfig::from_env`].
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();
        let rate_defaults = RateLimitConfig::default();
        Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:3100".into()),
            pg_connection_url: var("DATABASE_URL")
                .unwrap_or_else(|| "postgres://localhost:5432/mercato".into()),
            jwt_secret: resolve_jwt_secret(),
            access_token_ttl_secs: positive_or(
                var("ACCESS_TOKEN_EXP_SECONDS").as_deref(),
                DEFAULT_ACCESS_TOKEN_TTL_SECS,
            ),
            refresh_token_ttl_secs: positive_or(
                var("REFRESH_TOKEN_EXP_SECONDS").as_deref(),
                DEFAULT_REFRESH_TOKEN_TTL_SECS,
            ),
            currency: var("PAYMENT_CURRENCY")
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CURRENCY.into()),
            rate_limit: RateLimitConfig {
                per_second: positive_or(
                    var("RATE_LIMIT_PER_SECOND").as_deref(),
                    rate_defaults.per_second,
                ),
                burst: positive_or(var("RATE_LIMIT_BURST").as_deref(), rate_defaults.burst),
                trust_forwarded_for: var("RATE_LIMIT_TRUST_FORWARDED_FOR")
                    .map(|v| parse_flag(&v))
                    .unwrap_or(rate_defaults.trust_forwarded_for),
            },
            payment: PaymentConfig::from_env(),
        }
    }

    /// Token lifetimes and signing material for the refresh token store.
    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            jwt_secret: self.jwt_secret.clone(),
            access_ttl: Duration::seconds(self.access_token_ttl_secs),
            refresh_ttl: Duration::seconds(self.refresh_token_ttl_secs),
        }
    }
}

/// Parse a strictly positive number, falling back to `default` when the
/// value is missing, unparsable or not positive.
fn positive_or<T>(raw: Option<&str>, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    raw.and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_or_falls_back() {
        assert_eq!(positive_or(Some("3600"), 86_400_i64), 3600);
        assert_eq!(positive_or(Some(" 60 "), 86_400_i64), 60);
        assert_eq!(positive_or(Some("0"), 86_400_i64), 86_400);
        assert_eq!(positive_or(Some("-5"), 86_400_i64), 86_400);
        assert_eq!(positive_or(Some("soon"), 86_400_i64), 86_400);
        assert_eq!(positive_or(None, 20_u32), 20);
        assert_eq!(positive_or(Some("2.5"), 10.0_f64), 2.5);
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" ON "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
