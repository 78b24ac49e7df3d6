use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VitalsSourceKind {
    /// Randomised plausible readings, no device required.
    Simulated,
    /// Summary endpoint of the wearable integration API.
    Wearable,
}

impl FromStr for VitalsSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" | "mock" => Ok(Self::Simulated),
            "wearable" => Ok(Self::Wearable),
            other => Err(format!("unknown vitals source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_jwt_secret: String,
    pub vitals_source: VitalsSourceKind,
    pub wearable_api_url: String,
    pub vitals_fetch_timeout_seconds: u64,
    pub vitals_fetch_max_attempts: u32,
    pub vitals_retry_delay_ms: u64,
    /// How long finished tracking sessions stay queryable before eviction.
    pub tracking_session_retention_minutes: u64,
    pub tracking_max_active_sessions: usize,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_jwt_secret: String::new(),
            vitals_source: VitalsSourceKind::Simulated,
            wearable_api_url: "http://localhost:8000".to_string(),
            vitals_fetch_timeout_seconds: 10,
            vitals_fetch_max_attempts: 1,
            vitals_retry_delay_ms: 500,
            tracking_session_retention_minutes: 60,
            tracking_max_active_sessions: 10,
            port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            vitals_source: match env::var("VITALS_SOURCE") {
                Ok(value) => value.parse().unwrap_or_else(|e| {
                    warn!("{}, falling back to simulated vitals", e);
                    VitalsSourceKind::Simulated
                }),
                Err(_) => defaults.vitals_source,
            },
            wearable_api_url: env::var("WEARABLE_API_URL")
                .unwrap_or_else(|_| {
                    warn!("WEARABLE_API_URL not set, using default");
                    defaults.wearable_api_url.clone()
                }),
            vitals_fetch_timeout_seconds: parse_or("VITALS_FETCH_TIMEOUT_SECONDS", defaults.vitals_fetch_timeout_seconds),
            vitals_fetch_max_attempts: parse_or("VITALS_FETCH_MAX_ATTEMPTS", defaults.vitals_fetch_max_attempts),
            vitals_retry_delay_ms: parse_or("VITALS_RETRY_DELAY_MS", defaults.vitals_retry_delay_ms),
            tracking_session_retention_minutes: parse_or(
                "TRACKING_SESSION_RETENTION_MINUTES",
                defaults.tracking_session_retention_minutes,
            ),
            tracking_max_active_sessions: parse_or(
                "TRACKING_MAX_ACTIVE_SESSIONS",
                defaults.tracking_max_active_sessions,
            ),
            port: parse_or("PORT", defaults.port),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_wearable_configured(&self) -> bool {
        !self.wearable_api_url.is_empty()
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
