//! Message types for actor communication.

use ractor::RpcReplyPort;

/// Messages for the HeartbeatActor.
#[derive(Debug)]
pub enum HeartbeatMessage {
    /// A presence probe arrived on the ping queue.
    Probe,

    /// Number of probes answered so far.
    Answered { reply: RpcReplyPort<u64> },
}
