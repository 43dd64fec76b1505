//! Upstream stream handling: the live SSE pipeline and the
//! stream-to-buffer converter for unary clients.

mod buffer;
mod pipeline;

pub use buffer::{BufferedStreaming, SseExtractor};
pub use pipeline::{OnHeaders, StreamingPipeline};
