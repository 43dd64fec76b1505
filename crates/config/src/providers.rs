use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;

/// Which built-in provider plugin serves this entry.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Anthropic Messages upstream, authenticated with managed OAuth
    /// credentials.
    ClaudeApi,
    /// OpenAI Responses upstream. Streaming-only: unary clients are served
    /// through the stream-buffer path.
    Codex,
}

/// Configuration for a single provider plugin.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider implementation.
    #[serde(rename = "type")]
    pub kind: ProviderKind,

    /// Custom upstream base URL. Each provider has a sensible default.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Route prefix the provider mounts under. Defaults to the provider
    /// name, e.g. `/claude_api`.
    #[serde(default)]
    pub route_prefix: Option<String>,

    /// Static API key. When present it takes precedence over managed
    /// OAuth credentials.
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// OAuth token endpoint override, mainly for tests.
    #[serde(default)]
    pub oauth_token_url: Option<String>,

    /// OAuth client id sent with refresh requests.
    #[serde(default)]
    pub oauth_client_id: Option<String>,

    /// Model cards returned from `GET <prefix>/v1/models`.
    #[serde(default)]
    pub models: IndexMap<String, ModelCardConfig>,
}

impl ProviderConfig {
    /// Route prefix for this provider, normalized to start with `/`.
    pub fn route_prefix_or(&self, name: &str) -> String {
        match &self.route_prefix {
            Some(prefix) if prefix.starts_with('/') => prefix.clone(),
            Some(prefix) => format!("/{prefix}"),
            None => format!("/{name}"),
        }
    }
}

/// A single entry of the `/v1/models` listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelCardConfig {
    /// Display name; the map key is used when absent.
    pub display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn provider_route_prefix_defaults_to_name() {
        let config = indoc! {r#"
            type = "claude-api"
        "#};

        let config: ProviderConfig = toml::from_str(config).unwrap();
        assert_eq!(config.route_prefix_or("claude_api"), "/claude_api");
    }

    #[test]
    fn provider_route_prefix_normalized() {
        let config = indoc! {r#"
            type = "codex"
            route_prefix = "codex"
        "#};

        let config: ProviderConfig = toml::from_str(config).unwrap();
        assert_eq!(config.route_prefix_or("whatever"), "/codex");
    }

    #[test]
    fn provider_models_keep_declaration_order(){
        let config = indoc! {r#"
            type = "claude-api"

            [models.claude-sonnet-4]
            [models.claude-opus-4]
            display_name = "Claude Opus 4"
        "#};

        let config: ProviderConfig = toml::from_str(config).unwrap();
        let names: Vec<_> = config.models.keys().collect();
        assert_eq!(names, ["claude-sonnet-4", "claude-opus-4"]);
    }
}
