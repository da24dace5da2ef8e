//! Joining side: OFFER, RESPONSE, taking over as sponsor and the key cascade.
use gka_metrics::TimeMetric;
use tracing::{debug, info, warn};

use crate::error::Absorbed;
use crate::key_tree::KeyTree;
use crate::message::{Offer, Response};
use crate::runtime::{Effect, ProtocolEvent};
use crate::scheduler::Task;
use crate::types::{Endpoint, MemberId};
use crate::GkaError;

use super::StrMember;

impl StrMember {
    pub(super) fn handle_offer(&mut self, msg: Offer, from: Endpoint) -> Vec<Effect> {
        let mut out = Vec::new();
        if !self.serves(msg.offered_service) || self.member_id.is_some() || self.finished {
            self.note_assigned_sender(from);
            return out;
        }
        if !self.offer_seen {
            debug!(%from, "sponsor found");
            self.offer_seen = true;
            self.stats.record_timestamp(TimeMetric::KeyAgreementStart);
        }
        self.schedule(&mut out, Task::Request);
        out
    }

    pub(super) fn handle_response(&mut self, msg: Response, from: Endpoint) -> Vec<Effect> {
        let mut out = Vec::new();
        if !self.serves(msg.offered_service) || self.finished {
            return out;
        }
        if msg.member_count != self.member_count() {
            warn!(
                %from,
                theirs = msg.member_count,
                ours = self.member_count(),
                "member count mismatch, ignoring RESPONSE"
            );
            return out;
        }
        self.note_assigned_sender(from);

        let new_id = msg.new_sponsor.assigned_id;
        let new_sponsor = msg.new_sponsor.endpoint();
        if let Some(id) = self.member_id {
            if self.admitted.is_some() && new_id > id.saturating_add(1) {
                self.higher_member_id_assigned = true;
            }
        }

        self.record_member(from, new_id - 1, msg.blinded_predecessor_public_value.clone());
        self.record_member(new_sponsor, new_id, msg.new_sponsor.public_value.clone());

        if new_sponsor == self.local {
            if self.member_id.is_none() {
                if msg.new_sponsor.public_value != self.public {
                    warn!(%from, "RESPONSE names us with a foreign public value");
                    return out;
                }
                if let Err(e) = self.take_over(&mut out, &msg, new_id) {
                    self.error(&mut out, format!("taking over as member {new_id} failed: {e}"));
                }
            }
            return out;
        }

        if self.is_sponsor {
            // The RESPONSE may have filled in our last missing predecessor.
            self.admit_next(&mut out);
        } else if self.member_id.is_some() {
            self.cascade(&mut out);
            self.advance_synch(&mut out);
        }
        out
    }

    /// Compute our first link from the previous root and become sponsor.
    fn take_over(
        &mut self,
        out: &mut Vec<Effect>,
        msg: &Response,
        id: MemberId,
    ) -> Result<(), GkaError> {
        let root_secret = self.kx.agree(&self.secret, &msg.new_group_public_value)?;
        let root_public = self.kx.public_of(&root_secret)?;
        self.crypto_op();
        self.crypto_op();

        self.tree = Some(KeyTree::build(
            root_secret,
            Some(root_public),
            Some(self.secret.clone()),
            self.public.clone(),
        ));
        self.member_id = Some(id);
        self.keys_computed = 1;
        self.is_sponsor = true;
        self.members.record(self.local, id, self.public.clone());
        self.stats.record_timestamp(TimeMetric::KeyAgreementStart);
        info!(member_id = id, "admitted, now sponsor");

        self.cancel(out, Task::Request);
        self.cancel(out, Task::Find);
        out.push(Effect::Emit(ProtocolEvent::Assigned { member_id: id }));
        out.push(Effect::Emit(ProtocolEvent::BecameSponsor { member_id: id }));
        self.key_computed(out);

        if id < self.member_count() {
            if self.pending.is_empty() {
                let offer = self.offer();
                self.repeat(out, Task::Offer, offer);
            } else {
                self.admit_next(out);
            }
            return Ok(());
        }

        // Last member: the group is complete, start the token round.
        self.is_sponsor = false;
        self.check_complete(out);
        self.forward_token(out);
        Ok(())
    }

    /// Apply every contiguous successor contribution we already hold.
    pub(super) fn cascade(&mut self, out: &mut Vec<Effect>) {
        let Some(id) = self.member_id else {
            return;
        };
        loop {
            let Some(next) = self.keys_computed.checked_add(id) else {
                break;
            };
            if next > self.member_count() {
                break;
            }
            let Some(public) = self.members.public_of(next).cloned() else {
                if let Some(highest_known) = self.members.highest_id().filter(|h| *h > next) {
                    Absorbed::OutOfOrderCascade {
                        expected: next,
                        highest_known,
                    }
                    .log();
                }
                break;
            };
            let kx = self.kx.as_ref();
            let Some(tree) = self.tree.as_mut() else {
                break;
            };
            if let Err(e) = tree.extend(&public, kx, false) {
                self.error(out, format!("cascade with member {next} failed: {e}"));
                break;
            }
            self.crypto_op();
            self.keys_computed += 1;
            self.key_computed(out);
        }
        self.check_complete(out);
    }
}
