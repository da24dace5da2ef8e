use std::time::Duration;

use crate::message::Message;
use crate::scheduler::Task;
use crate::types::Endpoint;

use super::ProtocolEvent;

/// Intention produced by the pure protocol state.
///
/// Every handler returns `Vec<Effect>`; the event loop carries them out
/// through the transport, the scheduler and the event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send to the whole group.
    Multicast(Message),

    /// Send to one member.
    Unicast { to: Endpoint, message: Message },

    /// Run `task` after `delay`. Replaces an earlier deadline for the same task.
    Schedule { task: Task, delay: Duration },

    /// Drop a pending deadline.
    Cancel(Task),

    /// Tell the application something happened.
    Emit(ProtocolEvent),

    /// Stop the event loop once the remaining effects have run.
    Terminate,
}

impl Effect {
    /// The outbound message carried by this effect, if any.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Effect::Multicast(message) | Effect::Unicast { message, .. } => Some(message),
            _ => None,
        }
    }
}
