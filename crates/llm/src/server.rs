//! Assembles the request-processing stack from configuration.
//!
//! Builds the plugin registry, freezes the hook registry into a manager,
//! schedules plugin tasks, and produces the axum router with each
//! provider's endpoints nested under its route prefix.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};

use crate::{
    hooks::{HookManager, HookRegistry},
    plugin::{PluginContext, PluginRegistry},
    plugins::builtin_factories,
    protocol::WireFormat,
    proxy::ProxyDispatcher,
    scheduler::Scheduler,
};

/// The assembled server: routes plus the scheduler driving background
/// tasks.
pub struct LlmServer {
    pub router: Router,
    pub scheduler: Arc<Scheduler>,
}

/// Build the router and scheduler from configuration.
pub async fn build(config: Arc<config::Config>) -> anyhow::Result<LlmServer> {
    let http = crate::http_client();
    let context = PluginContext::new(config.clone(), http.clone());

    let registry = PluginRegistry::build(&context, builtin_factories())?;
    log::info!("Loaded plugins: {}", registry.plugin_names().join(", "));

    let mut hook_registry = HookRegistry::new();
    registry.collect_hooks(&mut hook_registry);
    let hooks = HookManager::new(Arc::new(hook_registry));

    let scheduler = Arc::new(Scheduler::new(config.scheduler.graceful_timeout));
    for task in registry.collect_tasks() {
        scheduler.add_task(task).await;
    }

    let mut router = Router::new();

    for provider in registry.providers() {
        let prefix = provider.route_prefix().to_string();
        let dispatcher = Arc::new(ProxyDispatcher::new(
            provider.clone(),
            hooks.clone(),
            http.clone(),
            config.server.client_auth,
            config.server.upstream_timeout,
        ));

        let provider_routes = Router::new()
            .route("/v1/messages", post(messages))
            .route("/v1/chat/completions", post(chat_completions))
            .route("/v1/responses", post(responses))
            .route("/v1/models", get(models))
            .with_state(dispatcher);

        log::info!("Mounting provider '{}' at {prefix}", provider.name());
        router = router.nest(&prefix, provider_routes);
    }

    Ok(LlmServer { router, scheduler })
}

async fn messages(
    State(dispatcher): State<Arc<ProxyDispatcher>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatcher.dispatch(WireFormat::AnthropicMessages, headers, body).await
}

async fn chat_completions(
    State(dispatcher): State<Arc<ProxyDispatcher>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatcher.dispatch(WireFormat::ChatCompletions, headers, body).await
}

async fn responses(
    State(dispatcher): State<Arc<ProxyDispatcher>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatcher.dispatch(WireFormat::Responses, headers, body).await
}

async fn models(State(dispatcher): State<Arc<ProxyDispatcher>>) -> Response {
    Json(dispatcher.provider().models()).into_response()
}
