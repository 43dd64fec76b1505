use std::sync::Arc;

use super::{DiscoveredManifest, PluginContext, PluginFactory, PluginManifest, PluginRuntime, discover};
use crate::{hooks::HookRegistry, proxy::ProviderAdapter, scheduler::ScheduledTask};

struct LoadedPlugin {
    manifest: PluginManifest,
    runtime: Box<dyn PluginRuntime>,
}

/// The resolved plugin set.
///
/// Built once at startup; request-time code only reads it, so it is
/// shared without locking.
pub struct PluginRegistry {
    plugins: Vec<LoadedPlugin>,
    providers: Vec<Arc<dyn ProviderAdapter>>,
}

impl PluginRegistry {
    /// Discover, filter, validate, and instantiate plugins.
    ///
    /// Hard dependencies must resolve within the surviving set, and every
    /// declared or required format-adapter pair must be translatable;
    /// either failure aborts startup with a descriptive error.
    pub fn build(context: &PluginContext, factories: Vec<Box<dyn PluginFactory>>) -> anyhow::Result<Self> {
        let builtin_manifests: Vec<PluginManifest> = factories.iter().map(|f| f.manifest()).collect();
        let discovered = discover(&context.config.plugins, builtin_manifests)?;

        validate(&discovered)?;

        let mut plugins = Vec::new();
        let mut providers: Vec<Arc<dyn ProviderAdapter>> = Vec::new();

        for DiscoveredManifest { manifest, .. } in discovered {
            let Some(factory) = factories.iter().find(|f| f.manifest().name == manifest.name) else {
                anyhow::bail!(
                    "Plugin '{}' has a manifest but no factory; filesystem manifests can only override built-in plugins",
                    manifest.name
                );
            };

            let plugin_context = context.for_plugin(&manifest.name);
            let runtime = factory
                .create(&plugin_context)
                .map_err(|e| anyhow::anyhow!("initializing plugin '{}': {e}", manifest.name))?;

            if manifest.is_provider {
                let Some(provider) = runtime.provider() else {
                    anyhow::bail!("Provider plugin '{}' produced no adapter", manifest.name);
                };
                providers.push(provider);
            }

            log::info!("Loaded plugin '{}' v{}", manifest.name, manifest.version);
            plugins.push(LoadedPlugin { manifest, runtime });
        }

        Ok(Self { plugins, providers })
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.manifest.name.as_str()).collect()
    }

    pub fn providers(&self) -> &[Arc<dyn ProviderAdapter>] {
        &self.providers
    }

    /// Locate the provider whose route prefix owns `path`.
    pub fn provider_for_path(&self, path: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers
            .iter()
            .find(|provider| {
                let prefix = provider.route_prefix();
                path == prefix || path.starts_with(&format!("{prefix}/"))
            })
            .cloned()
    }

    /// All hooks contributed by loaded plugins, in plugin load order.
    pub fn collect_hooks(&self, registry: &mut HookRegistry) {
        for plugin in &self.plugins {
            for hook in plugin.runtime.hooks() {
                registry.register(hook);
            }
        }
    }

    /// All scheduled tasks contributed by loaded plugins.
    pub fn collect_tasks(&self) -> Vec<Arc<dyn ScheduledTask>> {
        self.plugins.iter().flat_map(|p| p.runtime.tasks()).collect()
    }
}

fn validate(discovered: &[DiscoveredManifest]) -> anyhow::Result<()> {
    let names: Vec<&str> = discovered.iter().map(|d| d.manifest.name.as_str()).collect();

    for DiscoveredManifest { manifest, .. } in discovered {
        for dependency in &manifest.dependencies {
            if !names.contains(&dependency.as_str()) {
                anyhow::bail!(
                    "Plugin '{}' depends on '{dependency}', which is not loaded",
                    manifest.name
                );
            }
        }

        for optional in &manifest.optional_requires {
            if !names.contains(&optional.as_str()) {
                log::debug!(
                    "Plugin '{}' optional dependency '{optional}' is absent",
                    manifest.name
                );
            }
        }

        for decl in manifest.format_adapters.iter().chain(&manifest.required_format_adapters) {
            if !decl.is_resolvable() {
                anyhow::bail!(
                    "Plugin '{}' requires an unresolvable format adapter {} -> {}",
                    manifest.name,
                    decl.client,
                    decl.upstream
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::ManifestSource;

    #[test]
    fn builtin_plugins_load_and_route_by_prefix() {
        let context = PluginContext::new(std::sync::Arc::new(config::Config::default()), reqwest::Client::new());
        let registry = PluginRegistry::build(&context, crate::plugins::builtin_factories()).unwrap();

        assert!(registry.plugin_names().contains(&"claude_api"));
        assert!(registry.plugin_names().contains(&"codex"));
        assert_eq!(registry.providers().len(), 2);

        let provider = registry.provider_for_path("/claude_api/v1/messages").unwrap();
        assert_eq!(provider.name(), "claude_api");

        assert!(registry.provider_for_path("/claude_apiX/v1/messages").is_none());

        // The system plugin contributes a hook but no provider.
        let mut hooks = HookRegistry::new();
        registry.collect_hooks(&mut hooks);
        assert!(!hooks.is_empty());

        // The provider plugin contributes the refresh task.
        assert_eq!(registry.collect_tasks().len(), 1);
    }

    fn manifest(toml_src: &str) -> DiscoveredManifest {
        DiscoveredManifest {
            manifest: toml::from_str(toml_src).unwrap(),
            source: ManifestSource::BuiltIn,
        }
    }

    #[test]
    fn missing_hard_dependency_aborts() {
        let discovered = vec![manifest(
            "name = \"a\"\nversion = \"1.0.0\"\ndependencies = [\"missing\"]",
        )];

        let err = validate(&discovered).unwrap_err();
        assert!(err.to_string().contains("depends on 'missing'"));
    }

    #[test]
    fn missing_optional_dependency_is_tolerated() {
        let discovered = vec![manifest(
            "name = \"a\"\nversion = \"1.0.0\"\noptional_requires = [\"missing\"]",
        )];

        assert!(validate(&discovered).is_ok());
    }

    #[test]
    fn resolvable_adapters_pass_validation() {
        let discovered = vec![manifest(
            r#"
            name = "a"
            version = "1.0.0"

            [[required_format_adapters]]
            client = "responses"
            upstream = "anthropic_messages"
            "#,
        )];

        assert!(validate(&discovered).is_ok());
    }
}
