use std::time::Duration;

use serde::Deserialize;

fn default_listen_address() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_upstream_timeout() -> Duration {
    Duration::from_secs(300)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    duration_str::parse(&raw).map_err(serde::de::Error::custom)
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the server binds to.
    pub listen_address: String,

    /// When enabled, a client-supplied `Authorization: Bearer` header is
    /// forwarded upstream instead of being stripped. Managed credentials are
    /// still used when the client sends none.
    pub client_auth: bool,

    /// Log filter string, e.g. `info` or `llm=debug,server=info`.
    pub log_filter: String,

    /// Wall-clock timeout applied to upstream calls.
    #[serde(deserialize_with = "deserialize_duration")]
    pub upstream_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            client_auth: false,
            log_filter: default_log_filter(),
            upstream_timeout: default_upstream_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn server_config_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();

        assert_eq!(config.listen_address, "127.0.0.1:8000");
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.upstream_timeout, Duration::from_secs(300));
    }

    #[test]
    fn server_config_humane_timeout() {
        let config = indoc! {r#"
            upstream_timeout = "2m30s"
        "#};

        let config: ServerConfig = toml::from_str(config).unwrap();
        assert_eq!(config.upstream_timeout, Duration::from_secs(150));
    }
}
