use gka_metrics::Snapshot;
use gka_protocol::ProtocolEvent;
use serde::Serialize;
use std::io::Write;

/// Emit a JSON line to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

/// Local wall-clock time for JSON events.
pub fn now_iso() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        .to_string()
}

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub endpoint: String,
    pub variant: String,
    pub is_sponsor: bool,
    pub service_id: u32,
    pub member_count: u16,
    pub timestamp: String,
}

// ── Protocol progress ───────────────────────────────────────────

/// One [`ProtocolEvent`], flattened for JSON.
#[derive(Serialize, Debug, PartialEq)]
pub struct EventProtocol {
    pub event: &'static str,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_s: f64,
}

impl EventProtocol {
    pub fn new(event: &ProtocolEvent, elapsed_s: f64) -> Self {
        let (kind, member_id, detail) = match event {
            ProtocolEvent::Assigned { member_id } => ("assigned", Some(*member_id), None),
            ProtocolEvent::BecameSponsor { member_id } => ("sponsor", Some(*member_id), None),
            ProtocolEvent::Admitted {
                member_id,
                endpoint,
            } => ("admitted", Some(*member_id), Some(endpoint.to_string())),
            ProtocolEvent::KeyComputed {
                keys_computed,
                root,
            } => ("key_computed", None, Some(format!("{keys_computed} {root}"))),
            ProtocolEvent::TokenReceived { from } => ("token", None, Some(from.to_string())),
            ProtocolEvent::GroupKeyEstablished {
                member_id,
                fingerprint,
            } => ("established", *member_id, Some(fingerprint.clone())),
            ProtocolEvent::Finished { member_id } => ("finished", *member_id, None),
            ProtocolEvent::Error { description } => ("error", None, Some(description.clone())),
        };
        Self {
            event: "protocol",
            kind,
            member_id,
            detail,
            elapsed_s,
        }
    }
}

// ── Statistics ──────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStatistics<'a> {
    pub event: &'static str,
    pub csv: String,
    pub statistics: &'a Snapshot,
    pub elapsed_s: f64,
}
