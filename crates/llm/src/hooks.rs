//! Request lifecycle hook bus.
//!
//! Observers (tracing, metrics, pricing) register [`Hook`]s against
//! lifecycle and stream events. Dispatch is sequential in
//! `(priority, registration order)`: each hook awaits completion before
//! the next runs, later hooks see earlier mutations of the context, and a
//! failing hook is logged and skipped without affecting the rest.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Lifecycle and stream events observable through the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    RequestStarted,
    RequestCompleted,
    RequestFailed,
    ProviderRequestSent,
    ProviderResponseReceived,
    ProviderError,
    ProviderStreamStart,
    ProviderStreamChunk,
    ProviderStreamEnd,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestStarted => "request_started",
            Self::RequestCompleted => "request_completed",
            Self::RequestFailed => "request_failed",
            Self::ProviderRequestSent => "provider_request_sent",
            Self::ProviderResponseReceived => "provider_response_received",
            Self::ProviderError => "provider_error",
            Self::ProviderStreamStart => "provider_stream_start",
            Self::ProviderStreamChunk => "provider_stream_chunk",
            Self::ProviderStreamEnd => "provider_stream_end",
        }
    }
}

/// Conventional priority layers, lower runs earlier.
pub mod layers {
    pub const CRITICAL: i32 = 100;
    pub const AUTH: i32 = 300;
    pub const ENRICHMENT: i32 = 500;
    pub const PROCESSING: i32 = 700;
    pub const OBSERVATION: i32 = 800;
    pub const CLEANUP: i32 = 900;
}

/// Mutable context passed through the hook chain, discarded after
/// dispatch.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub event: HookEvent,
    pub timestamp: jiff::Timestamp,
    pub provider: Option<String>,
    pub plugin: Option<String>,
    pub data: Map<String, Value>,
    pub metadata: Map<String, Value>,
    pub error: Option<String>,
}

impl HookContext {
    pub fn new(event: HookEvent, data: Map<String, Value>) -> Self {
        Self {
            event,
            timestamp: jiff::Timestamp::now(),
            provider: None,
            plugin: None,
            data,
            metadata: Map::new(),
            error: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A single observer.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    /// Dispatch position; see [`layers`].
    fn priority(&self) -> i32 {
        layers::PROCESSING
    }

    /// Events this hook wants to observe.
    fn events(&self) -> Vec<HookEvent>;

    async fn call(&self, context: &mut HookContext) -> anyhow::Result<()>;
}

/// Holds registered hooks, ordered per event by priority then
/// registration order. Built during startup and immutable afterwards.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn Hook>) {
        log::debug!("Registering hook '{}' at priority {}", hook.name(), hook.priority());
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Hooks subscribed to `event`, in dispatch order. The registration
    /// vector already encodes arrival order, so a stable sort by priority
    /// gives `(priority, registration order)`.
    fn hooks_for(&self, event: HookEvent) -> Vec<Arc<dyn Hook>> {
        let mut subscribed: Vec<Arc<dyn Hook>> = self
            .hooks
            .iter()
            .filter(|hook| hook.events().contains(&event))
            .cloned()
            .collect();

        subscribed.sort_by_key(|hook| hook.priority());
        subscribed
    }
}

/// Emits events through the registry.
#[derive(Clone)]
pub struct HookManager {
    registry: Arc<HookRegistry>,
}

impl HookManager {
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self { registry }
    }

    /// A manager with no hooks; dispatch is a no-op.
    pub fn empty() -> Self {
        Self {
            registry: Arc::new(HookRegistry::new()),
        }
    }

    /// Build a context and dispatch it.
    pub async fn emit(&self, event: HookEvent, data: Map<String, Value>) {
        let mut context = HookContext::new(event, data);
        self.emit_with_context(&mut context).await;
    }

    /// Dispatch an existing context. Fire-and-await: every hook completes
    /// (or fails) before the next starts.
    pub async fn emit_with_context(&self, context: &mut HookContext) {
        for hook in self.registry.hooks_for(context.event) {
            if let Err(e) = hook.call(context).await {
                log::warn!(
                    "Hook '{}' failed on {}: {e}",
                    hook.name(),
                    context.event.as_str()
                );
            }
        }
    }
}
