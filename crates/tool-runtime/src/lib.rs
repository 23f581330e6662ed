pub mod agent;
pub mod bridge;
pub mod classifier;
pub mod record;
pub mod registry;
pub mod session;
pub mod stream;
pub mod tool;
pub mod tracker;
pub mod watchdog;

pub use agent::{AgentError, EventStream, StreamingAgent};
pub use bridge::{BridgeError, BridgeHandle, BridgeState, StopReport};
pub use classifier::StreamEventClassifier;
pub use record::{NormalizedRecord, ProgressLevel, ToolEvent, ToolPhase, WireKind, WireRecord};
pub use registry::{RegistryError, ToolRegistry};
pub use session::StreamingSession;
pub use stream::EventKind;
pub use tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};
pub use tracker::{ToolCallState, ToolCallTracker};
pub use watchdog::StallWatchdog;
