//! Thread boundary between an engine running on its own thread and its
//! host.

use super::error::GraphError;
use super::executor::EngineStats;
use super::node::{GraphDef, NodeDef};
use super::snapshot::DebugSnapshot;
use crate::error::{EngineError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};

/// Commands sent from the host to the engine thread.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Replace the graph; leaves the engine stopped.
    LoadGraph(GraphDef),
    AddNode(NodeDef),
    Connect { src: String, dst: String },
    Start,
    Stop,
    /// Ticks per second; 0 idles the loop.
    SetTickRate(u32),
    RequestSnapshot,
    RequestStats,
    /// Stop producers and exit the engine thread.
    Shutdown,
}

/// Messages sent from the engine thread to the host.
#[derive(Debug, Clone)]
pub enum EngineMessage {
    /// Graph replaced; carries the new graph id.
    GraphLoaded(String),
    NodeAdded(String),
    Connected { src: String, dst: String },
    /// A graph command was rejected.
    GraphError(GraphError),
    Started,
    Stopped,
    Snapshot(DebugSnapshot),
    Stats(EngineStats),
    /// The engine thread is exiting.
    Shutdown,
}

/// Channel capacity for commands (host → engine).
pub(crate) const CMD_CHANNEL_CAPACITY: usize = 256;
/// Channel capacity for messages (engine → host).
/// 10,000 messages is several minutes of periodic stats.
pub(crate) const MSG_CHANNEL_CAPACITY: usize = 10_000;

/// Host-side handle for an engine thread.
pub struct EngineBridge {
    pub cmd_tx: Sender<EngineCommand>,
    pub msg_rx: Receiver<EngineMessage>,
}

impl EngineBridge {
    /// Create a new bridge pair: `(bridge_for_host, cmd_rx, msg_tx)`.
    ///
    /// The engine thread owns `cmd_rx` and `msg_tx`.
    pub fn new() -> (Self, Receiver<EngineCommand>, Sender<EngineMessage>) {
        let (cmd_tx, cmd_rx) = bounded(CMD_CHANNEL_CAPACITY);
        let (msg_tx, msg_rx) = bounded(MSG_CHANNEL_CAPACITY);
        (Self { cmd_tx, msg_rx }, cmd_rx, msg_tx)
    }

    /// Drain all pending messages.
    pub fn drain(&self) -> Vec<EngineMessage> {
        let mut msgs = Vec::new();
        while let Ok(msg) = self.msg_rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    /// Try to receive a single message without blocking.
    pub fn try_recv(&self) -> Option<EngineMessage> {
        self.msg_rx.try_recv().ok()
    }

    /// Send a command, failing once the engine thread has exited.
    pub fn send_command(&self, cmd: EngineCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| EngineError::Channel("engine thread has exited".to_string()))
    }

    pub fn load_graph(&self, graph: GraphDef) {
        let _ = self.cmd_tx.send(EngineCommand::LoadGraph(graph));
    }

    pub fn add_node(&self, node: NodeDef) {
        let _ = self.cmd_tx.send(EngineCommand::AddNode(node));
    }

    pub fn connect(&self, src: impl Into<String>, dst: impl Into<String>) {
        let _ = self.cmd_tx.send(EngineCommand::Connect {
            src: src.into(),
            dst: dst.into(),
        });
    }

    pub fn start(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Start);
    }

    pub fn stop(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Stop);
    }

    pub fn set_tick_rate(&self, hz: u32) {
        let _ = self.cmd_tx.send(EngineCommand::SetTickRate(hz));
    }

    pub fn request_snapshot(&self) {
        let _ = self.cmd_tx.send(EngineCommand::RequestSnapshot);
    }

    pub fn request_stats(&self) {
        let _ = self.cmd_tx.send(EngineCommand::RequestStats);
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
    }
}
