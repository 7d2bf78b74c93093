use std::env;
use std::time::Duration;

use crate::geofence::{Coordinate, Geofence};
use crate::status::StatusThresholds;

const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";
const DEFAULT_CHANNEL_URL: &str = "ws://localhost:8000/ws/vehicle-updates";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound for timer settings; keeps `Instant + delay` representable.
const MAX_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Externally supplied settings for the tracking core.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub channel_url: String,
    pub geofence: Geofence,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
    pub bootstrap_limit: u32,
    pub reconnect: ReconnectPolicy,
    pub thresholds: StatusThresholds,
}

impl Settings {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let geofence = Geofence::new(
            env::var("GEOFENCE_NAME").unwrap_or(defaults.geofence.name),
            Coordinate::new(
                env_f64("GEOFENCE_LAT", defaults.geofence.center.latitude),
                env_f64("GEOFENCE_LNG", defaults.geofence.center.longitude),
            ),
            env_f64("GEOFENCE_RADIUS", defaults.geofence.radius_m),
        );
        let reconnect = ReconnectPolicy {
            max_attempts: env_u64("RECONNECT_ATTEMPTS", u64::from(defaults.reconnect.max_attempts))
                .try_into()
                .unwrap_or(u32::MAX),
            base_delay: env_delay("RECONNECT_BASE_DELAY", defaults.reconnect.base_delay),
            max_delay: env_delay("RECONNECT_MAX_DELAY", defaults.reconnect.max_delay),
        };
        let thresholds = StatusThresholds {
            offline_after: chrono::Duration::try_seconds(env_i64(
                "OFFLINE_AFTER",
                defaults.thresholds.offline_after.num_seconds(),
            ))
            .unwrap_or(defaults.thresholds.offline_after),
            speed_limit: env_f64("SPEED_LIMIT", defaults.thresholds.speed_limit),
        };

        Self {
            api_url: env_string("FLEET_API_URL", DEFAULT_API_URL),
            channel_url: env_string("FLEET_CHANNEL_URL", DEFAULT_CHANNEL_URL),
            geofence,
            poll_interval: poll_period(env_secs("POLLING_INTERVAL", defaults.poll_interval)),
            request_timeout: env_delay("REQUEST_TIMEOUT", defaults.request_timeout),
            handshake_timeout: env_delay("HANDSHAKE_TIMEOUT", defaults.handshake_timeout),
            bootstrap_limit: env_u64("BOOTSTRAP_LIMIT", u64::from(defaults.bootstrap_limit))
                .try_into()
                .unwrap_or(u32::MAX),
            reconnect,
            thresholds,
        }
    }

    /// The polling period actually used: never zero and at most a week.
    #[must_use]
    pub fn poll_period(&self) -> Duration {
        poll_period(self.poll_interval)
    }
}

fn poll_period(interval: Duration) -> Duration {
    if interval.is_zero() {
        tracing::warn!("polling interval must be non-zero, using {DEFAULT_POLL_INTERVAL:?}");
        return DEFAULT_POLL_INTERVAL;
    }
    interval.min(MAX_DELAY)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            channel_url: DEFAULT_CHANNEL_URL.to_string(),
            geofence: Geofence::new("Plant Gate", Coordinate::new(40.7128, -74.0060), 100.0),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            bootstrap_limit: 100,
            reconnect: ReconnectPolicy::default(),
            thresholds: StatusThresholds::default(),
        }
    }
}

/// Backoff schedule for re-establishing a lost live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Zero disables reconnects; the synchronizer then polls indefinitely.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Delay before the zero-based `attempt`: `base * 2^attempt`, capped.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.checked_mul(factor).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    #[must_use]
    pub const fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|value| !value.trim().is_empty()).unwrap_or_else(|| {
        tracing::trace!("{key} not set, using default: {default}");
        default.to_string()
    })
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|value| value.parse::<f64>().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|value| value.parse::<i64>().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|value| value.parse::<u64>().ok()).unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn env_delay(key: &str, default: Duration) -> Duration {
    env_secs(key, default).min(MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
        assert!((settings.geofence.radius_m - 100.0).abs() < f64::EPSILON);
        assert_eq!(settings.thresholds.offline_after, chrono::Duration::minutes(10));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(2));
        assert_eq!(policy.delay(1), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(16));
        assert_eq!(policy.delay(10), Duration::from_secs(300));
        assert_eq!(policy.delay(40), Duration::from_secs(300));
    }

    #[test]
    fn poll_period_is_never_zero() {
        let zero = Settings { poll_interval: Duration::ZERO, ..Settings::default() };
        assert_eq!(zero.poll_period(), Duration::from_secs(30));

        let huge = Settings { poll_interval: Duration::from_secs(u64::MAX), ..Settings::default() };
        assert_eq!(huge.poll_period(), MAX_DELAY);

        let custom = Settings { poll_interval: Duration::from_secs(5), ..Settings::default() };
        assert_eq!(custom.poll_period(), Duration::from_secs(5));
    }

    #[test]
    fn zero_attempts_disables_reconnect() {
        let policy = ReconnectPolicy { max_attempts: 0, ..ReconnectPolicy::default() };
        assert!(!policy.allows(0));
        assert!(ReconnectPolicy::default().allows(4));
        assert!(!ReconnectPolicy::default().allows(5));
    }
}
