use std::path::PathBuf;

use super::PluginManifest;

/// Where a manifest came from. Filesystem manifests override built-in
/// manifests of the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    BuiltIn,
    Filesystem(PathBuf),
}

#[derive(Debug, Clone)]
pub struct DiscoveredManifest {
    pub manifest: PluginManifest,
    pub source: ManifestSource,
}

/// Discover the effective manifest set.
///
/// Built-in manifests seed the table; each configured plugin directory is
/// scanned for `<dir>/<plugin>/plugin.toml`, and a filesystem manifest
/// replaces a built-in of the same name. Two filesystem manifests with the
/// same name are an error. The allowlist (when non-empty) and the
/// effective denylist filter the result; the denylist always wins.
pub fn discover(
    plugins: &config::PluginsConfig,
    builtin: Vec<PluginManifest>,
) -> anyhow::Result<Vec<DiscoveredManifest>> {
    let mut discovered: Vec<DiscoveredManifest> = builtin
        .into_iter()
        .map(|manifest| DiscoveredManifest {
            manifest,
            source: ManifestSource::BuiltIn,
        })
        .collect();

    for directory in &plugins.directories {
        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Skipping plugin directory {}: {e}", directory.display());
                continue;
            }
        };

        for entry in entries.flatten() {
            let manifest_path = entry.path().join("plugin.toml");
            if !manifest_path.is_file() {
                continue;
            }

            let content = std::fs::read_to_string(&manifest_path)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", manifest_path.display()))?;
            let manifest: PluginManifest = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("parsing {}: {e}", manifest_path.display()))?;

            let existing = discovered.iter().position(|d| d.manifest.name == manifest.name);

            match existing {
                Some(index) if discovered[index].source == ManifestSource::BuiltIn => {
                    log::info!(
                        "Filesystem plugin '{}' overrides the built-in manifest",
                        manifest.name
                    );
                    discovered[index] = DiscoveredManifest {
                        manifest,
                        source: ManifestSource::Filesystem(manifest_path),
                    };
                }
                Some(_) => {
                    anyhow::bail!(
                        "Duplicate plugin manifest '{}' at {}",
                        manifest.name,
                        manifest_path.display()
                    );
                }
                None => {
                    discovered.push(DiscoveredManifest {
                        manifest,
                        source: ManifestSource::Filesystem(manifest_path),
                    });
                }
            }
        }
    }

    let denylist = plugins.effective_denylist();
    let allowlist = &plugins.enabled_plugins;

    discovered.retain(|d| {
        let name = &d.manifest.name;

        if denylist.contains(name) {
            log::info!("Plugin '{name}' is disabled");
            return false;
        }

        if !allowlist.is_empty() && !allowlist.contains(name) {
            log::debug!("Plugin '{name}' is not in the allowlist");
            return false;
        }

        true
    });

    Ok(discovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn builtin(name: &str) -> PluginManifest {
        toml::from_str(&format!("name = \"{name}\"\nversion = \"1.0.0\"")).unwrap()
    }

    fn write_manifest(dir: &std::path::Path, name: &str, version: &str) {
        let plugin_dir = dir.join(name);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.toml"),
            format!("name = \"{name}\"\nversion = \"{version}\"\n"),
        )
        .unwrap();
    }

    #[test]
    fn filesystem_manifest_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "claude_api", "9.9.9");

        let config: config::PluginsConfig =
            toml::from_str(&format!("directories = [{:?}]", dir.path().to_str().unwrap())).unwrap();

        let discovered = discover(&config, vec![builtin("claude_api"), builtin("codex")]).unwrap();

        let claude = discovered.iter().find(|d| d.manifest.name == "claude_api").unwrap();
        assert_eq!(claude.manifest.version, "9.9.9");
        assert!(matches!(claude.source, ManifestSource::Filesystem(_)));

        let codex = discovered.iter().find(|d| d.manifest.name == "codex").unwrap();
        assert_eq!(codex.source, ManifestSource::BuiltIn);
    }

    #[test]
    fn denylist_wins_over_allowlist() {
        let config: config::PluginsConfig = toml::from_str(indoc! {r#"
            enabled_plugins = ["claude_api", "codex"]
            disabled_plugins = ["codex"]
        "#})
        .unwrap();

        let discovered = discover(&config, vec![builtin("claude_api"), builtin("codex")]).unwrap();
        let names: Vec<_> = discovered.iter().map(|d| d.manifest.name.as_str()).collect();

        assert_eq!(names, ["claude_api"]);
    }

    #[test]
    fn per_plugin_enabled_false_joins_the_denylist() {
        let config: config::PluginsConfig = toml::from_str(indoc! {r#"
            [request_tracer]
            enabled = false
        "#})
        .unwrap();

        let discovered = discover(&config, vec![builtin("request_tracer"), builtin("codex")]).unwrap();
        let names: Vec<_> = discovered.iter().map(|d| d.manifest.name.as_str()).collect();

        assert_eq!(names, ["codex"]);
    }

    #[test]
    fn duplicate_filesystem_manifests_error() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        write_manifest(dir_a.path(), "custom", "1.0.0");
        write_manifest(dir_b.path(), "custom", "2.0.0");

        let config: config::PluginsConfig = toml::from_str(&format!(
            "directories = [{:?}, {:?}]",
            dir_a.path().to_str().unwrap(),
            dir_b.path().to_str().unwrap()
        ))
        .unwrap();

        let err = discover(&config, Vec::new()).unwrap_err();
        assert!(err.to_string().contains("Duplicate plugin manifest"));
    }
}
