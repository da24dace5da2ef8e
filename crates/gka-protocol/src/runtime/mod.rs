//! Protocol runtime: drives a [`KeyAgreementProtocol`] over a [`Transport`].
//!
//! The protocol state is pure: every handler returns [`Effect`]s. The
//! runtime owns the state, the transport and a [`Scheduler`] and runs one
//! event loop that multiplexes inbound datagrams, expired deadlines and
//! application commands. Nothing else touches I/O.
mod effect;
mod executor;
mod r#loop;
pub mod transport;

pub use effect::Effect;
pub use transport::Transport;

use tokio::sync::{mpsc, oneshot};

use crate::protocol::{KeyAgreementProtocol, MemberStatus};
use crate::types::{Endpoint, MemberId};

const COMMAND_CAPACITY: usize = 16;
const EVENT_CAPACITY: usize = 256;

// ── Events (runtime → app) ───────────────────────────────────────────

/// What happened inside the protocol. Secrets only appear redacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// We received a member id.
    Assigned { member_id: MemberId },
    /// We are now the sponsor.
    BecameSponsor { member_id: MemberId },
    /// We admitted a new member (and handed it the sponsor role).
    Admitted {
        member_id: MemberId,
        endpoint: Endpoint,
    },
    /// One more link of the key chain was computed.
    KeyComputed { keys_computed: u16, root: String },
    /// The synchronization token reached us.
    TokenReceived { from: Endpoint },
    /// We hold the full group secret.
    GroupKeyEstablished {
        member_id: Option<MemberId>,
        fingerprint: String,
    },
    /// The run is over; the event loop stops after this.
    Finished { member_id: Option<MemberId> },
    /// A non-fatal failure (send error, bad peer input).
    Error { description: String },
}

// ── Commands (app → runtime) ─────────────────────────────────────────

pub enum RuntimeCommand {
    Snapshot { reply: oneshot::Sender<MemberStatus> },
    Shutdown,
}

/// Handle to a running member. Cheap to clone.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    local_endpoint: Endpoint,
}

impl RuntimeHandle {
    pub fn local_endpoint(&self) -> Endpoint {
        self.local_endpoint
    }

    /// Current member status, or `None` once the runtime has stopped.
    pub async fn snapshot(&self) -> Option<MemberStatus> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(RuntimeCommand::Snapshot { reply: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Stop the event loop without waiting for the protocol to finish.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::Shutdown).await;
    }
}

/// Returned by [`MemberRuntime::spawn`].
pub struct RuntimeChannels {
    pub handle: RuntimeHandle,
    /// Closed once the event loop has stopped.
    pub events: mpsc::Receiver<ProtocolEvent>,
}

pub struct MemberRuntime;

impl MemberRuntime {
    /// Spawn the event loop for `protocol` on the current tokio runtime.
    pub fn spawn<P, T>(protocol: P, transport: T) -> RuntimeChannels
    where
        P: KeyAgreementProtocol + 'static,
        T: Transport + 'static,
    {
        let local_endpoint = protocol.local_endpoint();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

        tokio::spawn(r#loop::runtime_loop(protocol, transport, cmd_rx, event_tx));

        RuntimeChannels {
            handle: RuntimeHandle {
                cmd_tx,
                local_endpoint,
            },
            events: event_rx,
        }
    }
}
