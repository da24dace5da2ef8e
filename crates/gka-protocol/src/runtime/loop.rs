/// The member event loop.
///
/// A single task owns the protocol state and multiplexes inbound
/// datagrams, scheduler deadlines and application commands. Protocol
/// callbacks never run concurrently.
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::protocol::{dispatch, KeyAgreementProtocol};
use crate::scheduler::Scheduler;

use super::executor::execute_effects;
use super::transport::Transport;
use super::{ProtocolEvent, RuntimeCommand};

pub(super) async fn runtime_loop<P, T>(
    mut protocol: P,
    transport: T,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    event_tx: mpsc::Sender<ProtocolEvent>,
) where
    P: KeyAgreementProtocol,
    T: Transport,
{
    let mut scheduler = Scheduler::new();
    let local = transport.local_endpoint();
    info!(%local, "member runtime started");

    let effects = protocol.on_start();
    if execute_effects(effects, &transport, &mut scheduler, &event_tx).await {
        info!("finished on start");
        return;
    }

    loop {
        let deadline = scheduler.next_deadline();
        let done = tokio::select! {
            // ── 1. Inbound datagrams ──────────────────────────────
            result = transport.recv() => match result {
                Ok((data, from)) => {
                    let effects = dispatch(&mut protocol, &data, from);
                    execute_effects(effects, &transport, &mut scheduler, &event_tx).await
                }
                Err(e) => {
                    warn!("receive failed: {e}");
                    false
                }
            },

            // ── 2. Expired deadlines ──────────────────────────────
            _ = sleep_until(deadline) => {
                let mut done = false;
                for task in scheduler.pop_expired(Instant::now()) {
                    let effects = protocol.on_timer(task);
                    if execute_effects(effects, &transport, &mut scheduler, &event_tx).await {
                        done = true;
                        break;
                    }
                }
                done
            }

            // ── 3. Application commands ───────────────────────────
            cmd = cmd_rx.recv() => match cmd {
                Some(RuntimeCommand::Snapshot { reply }) => {
                    let _ = reply.send(protocol.status());
                    false
                }
                Some(RuntimeCommand::Shutdown) | None => {
                    debug!("shutdown requested");
                    true
                }
            },
        };
        if done {
            break;
        }
    }

    info!(finished = protocol.is_finished(), "member runtime stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
