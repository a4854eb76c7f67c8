pub mod orchestrator;

pub use orchestrator::{
    effective_flow_id, qps_delay, HopRecord, HopSummary, TraceOrchestrator, TraceRun,
};
