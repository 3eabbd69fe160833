use std::env;
use std::time::Duration;

use crate::language::DEFAULT_TASK_TIMEOUT;

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub port: u16,
    /// Outer wall-clock limit on a single `/execute` request
    pub request_timeout_ms: u64,
    /// How long the API keeps a listener for a job that never reports back
    pub listener_ttl_ms: u64,
    pub log_format: LogFormat,
    pub worker_concurrency: usize,
    pub docker_socket: String,
    /// Docker API version the worker pins, e.g. "1.43"
    pub docker_api_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("REQUEST_TIMEOUT_MS ({request_ms}ms) must be longer than the task timeout ({task_ms}ms)")]
    RequestTimeoutTooShort { request_ms: u64, task_ms: u64 },
    #[error("LISTENER_TTL_MS ({ttl_ms}ms) must be longer than REQUEST_TIMEOUT_MS ({request_ms}ms)")]
    ListenerTtlTooShort { ttl_ms: u64, request_ms: u64 },
    #[error("WORKER_CONCURRENCY must be at least 1")]
    NoWorkers,
    #[error("invalid DOCKER_API_VERSION {0:?}, expected MAJOR.MINOR")]
    DockerApiVersion(String),
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            port: parsed_var("PORT").unwrap_or(3000),
            request_timeout_ms: parsed_var("REQUEST_TIMEOUT_MS").unwrap_or(10_000),
            listener_ttl_ms: parsed_var("LISTENER_TTL_MS").unwrap_or(60_000),
            log_format: match env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            worker_concurrency: parsed_var("WORKER_CONCURRENCY").unwrap_or(1),
            docker_socket: env::var("DOCKER_SOCKET")
                .unwrap_or_else(|_| "/var/run/docker.sock".to_string()),
            docker_api_version: Some(
                env::var("DOCKER_API_VERSION").unwrap_or_else(|_| "1.43".to_string()),
            )
            .filter(|v| !v.is_empty()),
        }
    }

    /// Check the relationships between settings that each parse fine alone
    pub fn validate(&self) -> Result<(), ConfigError> {
        let task_ms = DEFAULT_TASK_TIMEOUT.as_millis() as u64;
        if self.request_timeout_ms <= task_ms {
            return Err(ConfigError::RequestTimeoutTooShort {
                request_ms: self.request_timeout_ms,
                task_ms,
            });
        }
        // a listener pruned while its request still waits loses the outcome
        if self.listener_ttl_ms <= self.request_timeout_ms {
            return Err(ConfigError::ListenerTtlTooShort {
                ttl_ms: self.listener_ttl_ms,
                request_ms: self.request_timeout_ms,
            });
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::NoWorkers);
        }
        self.docker_api_version()?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn listener_ttl(&self) -> Duration {
        Duration::from_millis(self.listener_ttl_ms)
    }

    /// `(major, minor)` of the pinned Docker API version, if any
    pub fn docker_api_version(&self) -> Result<Option<(usize, usize)>, ConfigError> {
        let Some(raw) = &self.docker_api_version else {
            return Ok(None);
        };
        let bad = || ConfigError::DockerApiVersion(raw.clone());
        let (major, minor) = raw.trim().split_once('.').ok_or_else(bad)?;
        let major = major.parse().map_err(|_| bad())?;
        let minor = minor.parse().map_err(|_| bad())?;
        Ok(Some((major, minor)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            port: 3000,
            request_timeout_ms: 10_000,
            listener_ttl_ms: 60_000,
            log_format: LogFormat::Text,
            worker_concurrency: 1,
            docker_socket: "/var/run/docker.sock".to_string(),
            docker_api_version: Some("1.43".to_string()),
        }
    }

    #[test]
    fn test_config_defaults_are_valid() {
        assert!(config().validate().is_ok());
        assert_eq!(config().request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_request_timeout_must_exceed_task_timeout() {
        let mut c = config();
        c.request_timeout_ms = 5_000;
        assert_eq!(
            c.validate(),
            Err(ConfigError::RequestTimeoutTooShort {
                request_ms: 5_000,
                task_ms: 5_000
            })
        );
    }

    #[test]
    fn test_listener_ttl_must_exceed_request_timeout() {
        let mut c = config();
        c.listener_ttl_ms = 1_000;
        assert_eq!(
            c.validate(),
            Err(ConfigError::ListenerTtlTooShort {
                ttl_ms: 1_000,
                request_ms: 10_000
            })
        );

        c.listener_ttl_ms = 10_000;
        assert!(c.validate().is_err());

        c.listener_ttl_ms = 10_001;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut c = config();
        c.worker_concurrency = 0;
        assert_eq!(c.validate(), Err(ConfigError::NoWorkers));
    }

    #[test]
    fn test_docker_api_version() {
        let mut c = config();
        assert_eq!(c.docker_api_version(), Ok(Some((1, 43))));

        c.docker_api_version = None;
        assert_eq!(c.docker_api_version(), Ok(None));

        c.docker_api_version = Some("latest".to_string());
        assert!(c.validate().is_err());
    }
}
