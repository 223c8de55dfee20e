// src/config.rs

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use dotenvy::dotenv;

/// Default number of items returned by list endpoints.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Upper bound for the `limit` query parameter.
pub const MAX_PAGE_SIZE: i64 = 100;

/// A prediction needs at least two options to be votable.
pub const MIN_OPTIONS: u64 = 2;
pub const MAX_OPTIONS: u64 = 12;

pub const MAX_COMMENT_LENGTH: u64 = 2000;

/// Upper bound for the rank "time travel" debug tool, in days.
pub const MAX_REWIND_DAYS: i64 = 3650;

/// Number of days counted as "weekly activity".
pub const ACTIVITY_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub bind_addr: SocketAddr,
    /// Per-IP replenish rate for write routes. `None` disables rate limiting.
    pub rate_limit_per_second: Option<u64>,
    pub rate_limit_burst: u32,
    /// Minimum seconds between two unforced rank recalculations of a user.
    pub rank_recalc_cooldown_secs: i64,
    /// Period of the prediction status sweeper.
    pub lifecycle_sweep_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            database_url,
            jwt_secret,
            jwt_expiration: parse_or("JWT_EXPIRATION", 86_400),
            rust_log,
            admin_username: env::var("ADMIN_USERNAME").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            bind_addr: parse_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000))),
            rate_limit_per_second: env::var("RATE_LIMIT_PER_SECOND")
                .ok()
                .and_then(|v| v.parse().ok()),
            rate_limit_burst: parse_or("RATE_LIMIT_BURST", 10),
            rank_recalc_cooldown_secs: parse_or("RANK_RECALC_COOLDOWN_SECS", 300),
            lifecycle_sweep_secs: parse_or("LIFECYCLE_SWEEP_SECS", 60),
        }
    }
}

/// Reads an optional variable, falling back to `default` when it is absent or malformed.
fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring malformed {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
