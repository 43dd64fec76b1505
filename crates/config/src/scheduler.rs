use std::time::Duration;

use serde::Deserialize;

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    duration_str::parse(&raw).map_err(serde::de::Error::custom)
}

/// Scheduler defaults applied to tasks that do not override them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// How long `stop()` waits for running tasks before force-cancelling.
    #[serde(deserialize_with = "deserialize_duration")]
    pub graceful_timeout: Duration,

    /// Ceiling for exponential backoff after consecutive failures.
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_backoff: Duration,

    /// Fraction of the delay used as the jitter window.
    pub jitter_factor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(10),
            max_backoff: Duration::from_secs(3600),
            jitter_factor: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn scheduler_config_defaults() {
        let config: SchedulerConfig = toml::from_str("").unwrap();

        assert_eq!(config.graceful_timeout, Duration::from_secs(10));
        assert_eq!(config.max_backoff, Duration::from_secs(3600));
        assert!((config.jitter_factor - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn scheduler_config_overrides() {
        let config = indoc! {r#"
            graceful_timeout = "30s"
            max_backoff = "5m"
            jitter_factor = 0.25
        "#};

        let config: SchedulerConfig = toml::from_str(config).unwrap();
        assert_eq!(config.graceful_timeout, Duration::from_secs(30));
        assert_eq!(config.max_backoff, Duration::from_secs(300));
    }
}
