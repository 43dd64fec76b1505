use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use serde::Deserialize;
use toml::Value;

use crate::Config;

/// Load and validate configuration from a TOML file.
pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut raw_config: Value = toml::from_str(&content)?;

    expand_env_vars(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    Ok(config)
}

/// Locate the configuration file when none was passed explicitly.
///
/// Checks `$XDG_CONFIG_HOME/ccproxy/config.toml` first, then
/// `$HOME/.config/ccproxy/config.toml`. Returns `None` when neither exists.
pub fn discover_config_path() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        candidates.push(PathBuf::from(xdg).join("ccproxy").join("config.toml"));
    }

    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(PathBuf::from(home).join(".config").join("ccproxy").join("config.toml"));
    }

    candidates.into_iter().find(|path| path.is_file())
}

/// Expand `${VAR}` references in every string value of the raw document.
///
/// A reference to an unset variable is an error; the message carries the
/// TOML path of the offending value.
fn expand_env_vars<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => {
            if let Some(expanded) = expand_one(s).map_err(|var| {
                let mut p = String::new();

                for segment in path.iter() {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => write!(p, "[{i}]").unwrap(),
                    }
                }

                if p.ends_with('.') {
                    p.pop();
                }

                anyhow::anyhow!("environment variable '{var}' referenced at '{p}' is not set")
            })? {
                *s = expanded;
            }
        }
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_env_vars(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_env_vars(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

/// Expand a single string. Returns `Ok(None)` when it holds no reference,
/// `Err(name)` when a referenced variable is unset.
fn expand_one(input: &str) -> Result<Option<String>, String> {
    if !input.contains("${") {
        return Ok(None);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            // Unterminated reference, keep it verbatim.
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let name = &after[..end];
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => return Err(name.to_string()),
        }

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn expands_env_references() {
        temp_env::with_var("CCPROXY_TEST_KEY", Some("sk-test"), || {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.toml");

            std::fs::write(
                &path,
                indoc! {r#"
                    [providers.claude_api]
                    type = "claude-api"
                    api_key = "${CCPROXY_TEST_KEY}"
                "#},
            )
            .unwrap();

            let config = load(&path).unwrap();
            assert!(config.providers["claude_api"].api_key.is_some());
        });
    }

    #[test]
    fn unset_env_reference_names_the_path() {
        temp_env::with_var_unset("CCPROXY_DEFINITELY_UNSET", || {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.toml");

            std::fs::write(
                &path,
                indoc! {r#"
                    [providers.codex]
                    type = "codex"
                    api_key = "${CCPROXY_DEFINITELY_UNSET}"
                "#},
            )
            .unwrap();

            let err = load(&path).unwrap_err().to_string();
            assert!(err.contains("CCPROXY_DEFINITELY_UNSET"));
            assert!(err.contains("providers.codex.api_key"));
        });
    }

    #[test]
    fn discovery_honors_xdg_config_home() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("ccproxy");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "").unwrap();

        temp_env::with_var("XDG_CONFIG_HOME", Some(dir.path()), || {
            let found = discover_config_path().unwrap();
            assert_eq!(found, config_dir.join("config.toml"));
        });
    }
}
