//! Request tracer plugin.
//!
//! A system plugin that observes the request lifecycle at OBSERVATION
//! priority and appends JSONL records to a trace directory. Stream chunk
//! events are summarized by the terminal `provider_stream_end` record
//! instead of being written individually.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt as _;

use crate::{
    hooks::{Hook, HookContext, HookEvent, layers},
    plugin::{PluginContext, PluginFactory, PluginManifest, PluginRuntime},
};

const PLUGIN_NAME: &str = "request_tracer";

pub struct RequestTracerFactory;

impl PluginFactory for RequestTracerFactory {
    fn manifest(&self) -> PluginManifest {
        toml::from_str(include_str!("request_tracer.plugin.toml")).expect("static request_tracer manifest")
    }

    fn create(&self, context: &PluginContext) -> anyhow::Result<Box<dyn PluginRuntime>> {
        let directory = context
            .plugin_config
            .as_ref()
            .and_then(|c| c.get("directory"))
            .and_then(toml::Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("ccproxy-traces"));

        Ok(Box::new(RequestTracerRuntime {
            hook: Arc::new(TracerHook { directory }),
        }))
    }
}

struct RequestTracerRuntime {
    hook: Arc<TracerHook>,
}

impl PluginRuntime for RequestTracerRuntime {
    fn hooks(&self) -> Vec<Arc<dyn Hook>> {
        vec![self.hook.clone()]
    }
}

struct TracerHook {
    directory: PathBuf,
}

impl TracerHook {
    async fn append(&self, line: String) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let date = jiff::Zoned::now().strftime("%Y-%m-%d").to_string();
        let path = self.directory.join(format!("requests-{date}.jsonl"));

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

#[async_trait]
impl Hook for TracerHook {
    fn name(&self) -> &str {
        "request_tracer"
    }

    fn priority(&self) -> i32 {
        layers::OBSERVATION
    }

    fn events(&self) -> Vec<HookEvent> {
        vec![
            HookEvent::RequestStarted,
            HookEvent::RequestCompleted,
            HookEvent::RequestFailed,
            HookEvent::ProviderError,
            HookEvent::ProviderStreamEnd,
        ]
    }

    async fn call(&self, context: &mut HookContext) -> anyhow::Result<()> {
        let record = json!({
            "timestamp": context.timestamp.to_string(),
            "event": context.event.as_str(),
            "provider": context.provider,
            "data": context.data,
            "error": context.error,
        });

        self.append(record.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn manifest_declares_a_system_plugin() {
        let manifest = RequestTracerFactory.manifest();
        assert_eq!(manifest.name, "request_tracer");
        assert!(!manifest.is_provider);
    }

    #[tokio::test]
    async fn records_are_appended_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let hook = TracerHook {
            directory: dir.path().to_path_buf(),
        };

        let mut context = HookContext::new(HookEvent::RequestCompleted, serde_json::Map::new());
        context.data.insert("request_id".to_string(), json!("req-1"));
        hook.call(&mut context).await.unwrap();

        let mut context = HookContext::new(HookEvent::RequestFailed, serde_json::Map::new());
        context.error = Some("boom".to_string());
        hook.call(&mut context).await.unwrap();

        let file = std::fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "request_completed");
        assert_eq!(lines[0]["data"]["request_id"], "req-1");
        assert_eq!(lines[1]["error"], "boom");
    }
}
