pub mod sink;
pub mod summarize;

pub use sink::{JsonlSink, SinkRecord};
pub use summarize::{summarize_ping, summarize_trace, PingFileSummary, TraceHopLine};
