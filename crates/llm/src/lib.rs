//! Core request pipeline of the ccproxy server.
//!
//! The crate covers everything between the HTTP layer and the upstream
//! providers: typed wire formats for the three supported protocols
//! (Anthropic Messages, OpenAI Chat Completions, OpenAI Responses),
//! bidirectional format conversion for unary and streaming responses, the
//! SSE codec, the streaming pipeline and its stream-to-buffer twin, OAuth
//! credential management, the hook bus, the plugin registry, and the
//! cooperative task scheduler.

pub mod auth;
pub mod convert;
mod error;
pub mod hooks;
mod http_client;
pub mod plugin;
pub mod plugins;
pub mod protocol;
pub mod proxy;
pub mod scheduler;
pub mod server;
pub mod sse;
pub mod streaming;

pub use error::{LlmError, LlmResult as Result};
pub(crate) use http_client::http_client;
