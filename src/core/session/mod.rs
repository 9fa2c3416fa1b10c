//! Realtime voice session.
//!
//! - [`events`]: classify raw transport events and de-duplicate them
//! - [`transcript`]: ordered conversation items and breadcrumbs
//! - [`agent`]: agent declarations, handoffs and tools
//! - [`controller`]: connection lifecycle and the command API

pub mod agent;
pub mod controller;
pub mod events;
pub mod transcript;

pub use agent::{
    AgentConfig, AgentError, AgentResult, AgentSet, DEFAULT_AGENT_NAME, DEFAULT_AGENT_VOICE,
    HandoffTable, ToolError, ToolHandler, handoff_tool_name,
};
pub use controller::{
    ConnectOptions, MIN_PTT_HOLD, SessionController, SessionError, SessionEvent, SessionResult,
};
pub use events::{EventNormalizer, NormalizeError, Route, TransportEvent};
pub use transcript::{Breadcrumb, ItemStatus, TranscriptItem, TranscriptReconciler, TranscriptRole};
