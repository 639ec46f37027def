use std::{env, str::FromStr, time::Duration};

use crate::error::{Error, Result};
use crate::feedback::TransitionPolicy;

pub const SESSION_STORE_PATH: &str = "sessions.json";
pub const POLL_INTERVAL_SECS: u64 = 10;
pub const FETCH_DELAY_MS: u64 = 1000;
pub const LOCATION_TIMEOUT_SECS: u64 = 60;
pub const COLLEGE_DOMAIN: &str = "college.edu";
pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "password";

#[derive(Debug, Clone)]
pub struct Config {
    pub session_store_path: String,
    pub poll_interval: Duration,
    /// Simulated latency of mock calls (OTP send, bus fix).
    pub fetch_delay: Duration,
    pub location_timeout: Duration,
    pub college_domain: String,
    pub admin_username: String,
    pub admin_password: String,
    pub status_policy: TransitionPolicy,
    pub bus_api_url: Option<String>,
    pub locationiq_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_store_path: SESSION_STORE_PATH.to_string(),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            fetch_delay: Duration::from_millis(FETCH_DELAY_MS),
            location_timeout: Duration::from_secs(LOCATION_TIMEOUT_SECS),
            college_domain: COLLEGE_DOMAIN.to_string(),
            admin_username: ADMIN_USERNAME.to_string(),
            admin_password: ADMIN_PASSWORD.to_string(),
            status_policy: TransitionPolicy::Unrestricted,
            bus_api_url: None,
            locationiq_token: None,
        }
    }
}

impl Config {
    /// Reads the process environment. Call `dotenv` first to pick up `.env`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let status_policy = match lookup("STATUS_POLICY") {
            Some(v) => v.parse()?,
            None => defaults.status_policy,
        };

        let poll_interval = Duration::from_secs(parse_or(&lookup, "POLL_INTERVAL_SECS", POLL_INTERVAL_SECS)?);
        if poll_interval.is_zero() {
            return Err(Error::Config("POLL_INTERVAL_SECS must be at least 1".to_string()));
        }

        Ok(Self {
            session_store_path: lookup("SESSION_STORE_PATH").unwrap_or(defaults.session_store_path),
            poll_interval,
            fetch_delay: Duration::from_millis(parse_or(&lookup, "FETCH_DELAY_MS", FETCH_DELAY_MS)?),
            location_timeout: Duration::from_secs(parse_or(
                &lookup,
                "LOCATION_TIMEOUT_SECS",
                LOCATION_TIMEOUT_SECS,
            )?),
            college_domain: lookup("COLLEGE_DOMAIN").unwrap_or(defaults.college_domain),
            admin_username: lookup("ADMIN_USERNAME").unwrap_or(defaults.admin_username),
            admin_password: lookup("ADMIN_PASSWORD").unwrap_or(defaults.admin_password),
            status_policy,
            bus_api_url: lookup("BUS_API_URL").filter(|s| !s.is_empty()),
            locationiq_token: lookup("LOCATIONIQ_TOKEN").filter(|s| !s.is_empty()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {key} value {raw:?}: {e}"))),
        None => {
            log::debug!("{key} not set, using default");
            Ok(default)
        }
    }
}
