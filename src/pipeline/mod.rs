//! Tick-driven dataflow graph.
//!
//! Nodes are sources, transforms or sinks connected by named inputs. Each
//! tick the [`Engine`] drains the bus inbox into source slots and evaluates
//! every node once, inputs before consumers. The engine runs on a dedicated
//! thread and talks to its host through an [`EngineBridge`].
//!
//! # Architecture
//!
//! ```text
//! producers ──► Bus ──► Inbox ──► [bus source] ──► [bandpass] ──► [coherence] ──► [publish]
//!                ▲                                                                   │
//!                └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design
//!
//! - **Enum dispatch** for node behaviors: `Behavior` covers every built-in op.
//! - **Arena storage**: nodes live in a `Vec` indexed by [`NodeId`]; edges are
//!   stored as upstream index lists.
//! - **Lazy recompilation**: the [`ExecutionPlan`] is rebuilt when the graph
//!   generation changes.
//! - **Fault isolation**: a node that fails or panics keeps its last output.

pub mod bridge;
pub mod bus;
pub mod error;
pub mod executor;
pub mod graph;
pub mod id;
pub mod node;
pub mod nodes;
pub mod plan;
pub mod snapshot;
pub mod value;

pub use bridge::{EngineBridge, EngineCommand, EngineMessage};
pub use bus::{Bus, BusFrame, BusHandle, FramePayload, FrameType, Inbox, Subscription};
pub use error::{EvalResult, GraphError, NodeEvaluationError};
pub use executor::{Engine, EngineStats, TickReport};
pub use graph::{GraphStore, NodeRecord};
pub use id::NodeId;
pub use node::{Behavior, EvalContext, Evaluation, GraphDef, NodeDef, NodeInput, NodeKind};
pub use nodes::NodeFactory;
pub use plan::{ExecutionPlan, PlanStats};
pub use snapshot::{DebugSnapshot, NodeSnapshot};
pub use value::{ChannelMap, ConfigMap, ConfigValue, StateMap, Value};
