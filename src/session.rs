//! Session engine: the protocol state that outlives a single packet
//!
//! [`SessionState`] owns the identifier allocator, the flow-control quota,
//! the in-flight `QoS` flows and the topic alias tables of one session.

pub mod flow_control;
pub mod qos;
pub mod state;
pub mod store;
pub mod topic_alias;

pub use flow_control::FlowControl;
pub use qos::{FlowTransition, OutboundFlow, OutboundState, QosFlows};
pub use state::{PendingRequest, ServerLimits, SessionState};
pub use store::{FileSessionStore, MemorySessionStore, PersistedFlow, SessionSnapshot, SessionStore};
pub use topic_alias::{AliasAssignment, InboundAliases, OutboundAliases};
