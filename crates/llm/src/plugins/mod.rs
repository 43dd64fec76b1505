//! Built-in plugins: the entry-point table.

mod claude_api;
mod codex;
mod request_tracer;

pub use claude_api::ClaudeApiFactory;
pub use codex::CodexFactory;
pub use request_tracer::RequestTracerFactory;

use crate::plugin::PluginFactory;

/// Factories compiled into the binary. Filesystem manifests may override
/// their declarative parts; the deny/allow lists decide what loads.
pub fn builtin_factories() -> Vec<Box<dyn PluginFactory>> {
    vec![
        Box::new(ClaudeApiFactory),
        Box::new(CodexFactory),
        Box::new(RequestTracerFactory),
    ]
}
