//! Effect executor: the only place that touches I/O.

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::message::Message;
use crate::scheduler::Scheduler;

use super::effect::Effect;
use super::transport::Transport;
use super::ProtocolEvent;

/// Carry out `effects` in order. Returns `true` if the protocol asked to
/// terminate.
pub(super) async fn execute_effects<T: Transport>(
    effects: Vec<Effect>,
    transport: &T,
    scheduler: &mut Scheduler,
    event_tx: &mpsc::Sender<ProtocolEvent>,
) -> bool {
    let mut terminate = false;
    for effect in effects {
        match effect {
            Effect::Multicast(message) => {
                if let Some(bytes) = encode(&message, event_tx) {
                    trace!(kind = %message.message_type(), "multicast");
                    if let Err(e) = transport.send_multicast(&bytes).await {
                        report(
                            event_tx,
                            format!("multicast {} failed: {e}", message.message_type()),
                        );
                    }
                }
            }
            Effect::Unicast { to, message } => {
                if let Some(bytes) = encode(&message, event_tx) {
                    trace!(kind = %message.message_type(), %to, "unicast");
                    if let Err(e) = transport.send_unicast(to, &bytes).await {
                        report(
                            event_tx,
                            format!("send {} to {to} failed: {e}", message.message_type()),
                        );
                    }
                }
            }
            Effect::Schedule { task, delay } => scheduler.arm(task, Instant::now(), delay),
            Effect::Cancel(task) => scheduler.cancel(task),
            Effect::Emit(event) => {
                // Never block the loop on a slow consumer.
                let _ = event_tx.try_send(event);
            }
            Effect::Terminate => terminate = true,
        }
    }
    terminate
}

fn encode(message: &Message, event_tx: &mpsc::Sender<ProtocolEvent>) -> Option<Vec<u8>> {
    match message.encode() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            report(event_tx, format!("encode {} failed: {e}", message.message_type()));
            None
        }
    }
}

fn report(event_tx: &mpsc::Sender<ProtocolEvent>, description: String) {
    warn!("{description}");
    let _ = event_tx.try_send(ProtocolEvent::Error { description });
}
