//! Token round and termination.
//!
//! The last admitted member sends the token to member 1. Each holder
//! fetches whatever successor values it is missing, cascades to the full
//! group key and passes the token on. When it comes back to the last
//! member every member holds the key, and FINISH is broadcast until all
//! members acknowledged or the finish timeout fires.
use tracing::{debug, info, warn};

use crate::message::{Message, SynchToken};
use crate::runtime::{Effect, ProtocolEvent};
use crate::scheduler::Task;
use crate::types::{successor, Endpoint};

use super::StrMember;

impl StrMember {
    pub(super) fn handle_synch_token(&mut self, msg: SynchToken, from: Endpoint) -> Vec<Effect> {
        let mut out = Vec::new();
        if self.finished || self.finish_received {
            return out;
        }
        let Some(id) = self.member_id else {
            return out;
        };
        self.note_assigned_sender(from);

        let target = msg.target_member_id;
        if target == id {
            if !self.synch_token_received {
                self.synch_token_received = true;
                info!(member_id = id, %from, "token received");
                out.push(Effect::Emit(ProtocolEvent::TokenReceived { from }));
            }
            if id == self.member_count() {
                if !self.finishing {
                    self.start_finish(&mut out);
                }
            } else if self.synch_finished {
                // The sender missed our hand-off and keeps repeating.
                let token = self.token(successor(id, self.member_count()));
                self.unicast(&mut out, from, token);
            } else {
                self.cascade(&mut out);
                self.advance_synch(&mut out);
            }
            return out;
        }

        let next = successor(id, self.member_count());
        // The last member repeats its opening token until member 1 answers,
        // so its tokens say nothing about our hand-off. FINISH does.
        if next == self.member_count() {
            return out;
        }
        let forwarded_by_successor = target == successor(next, self.member_count())
            || self.members.id_of(&from) == Some(next);
        if forwarded_by_successor {
            self.successor_has_token(&mut out);
        }
        out
    }

    /// Stop repeating the token once our successor has it.
    pub(super) fn successor_has_token(&mut self, out: &mut Vec<Effect>) {
        if !self.token_forwarded || self.synch_finished {
            return;
        }
        debug!(member_id = ?self.member_id, "successor holds the token");
        self.synch_finished = true;
        self.cancel(out, Task::SynchToken);
    }

    /// Start repeating the token towards our successor.
    pub(super) fn forward_token(&mut self, out: &mut Vec<Effect>) {
        let Some(next) = self.successor() else {
            return;
        };
        self.token_forwarded = true;
        let token = self.token(next);
        self.repeat(out, Task::SynchToken, token);
    }

    /// Token holder: pass the token on once complete, otherwise ask for the
    /// missing successor values.
    pub(super) fn advance_synch(&mut self, out: &mut Vec<Effect>) {
        if !self.synch_token_received || self.finishing || self.finish_received || self.finished {
            return;
        }
        if self.complete() {
            self.cancel(out, Task::SynchRequest);
            if !self.synch_finished {
                self.forward_token(out);
            }
            return;
        }
        let missing = self.missing_successors();
        if missing.is_empty() {
            return;
        }
        debug!(?missing, "fetching successor values");
        let request = self.info_request(missing);
        self.repeat(out, Task::SynchRequest, Message::MemberInfoSynchRequest(request));
    }

    fn start_finish(&mut self, out: &mut Vec<Effect>) {
        info!("token returned, finishing");
        self.finishing = true;
        self.cancel(out, Task::SynchToken);
        self.repeat(out, Task::Finish, Message::Finish);
        self.armed.insert(Task::FinishTimeout);
        out.push(Effect::Schedule {
            task: Task::FinishTimeout,
            delay: self.config.finish_timeout,
        });
    }

    pub(super) fn handle_finish(&mut self, from: Endpoint) -> Vec<Effect> {
        let mut out = Vec::new();
        if self.finished || self.finishing {
            return out;
        }
        if self.member_id.is_none() {
            warn!(%from, "FINISH before being admitted, giving up");
            self.finish(&mut out);
            return out;
        }
        self.finish_received = true;
        if !self.complete() {
            warn!(
                keys_computed = self.keys_computed,
                "FINISH received without the full group key"
            );
        }
        self.unicast(&mut out, from, Message::FinishAck);
        self.finish(&mut out);
        out
    }

    pub(super) fn handle_finish_ack(&mut self, from: Endpoint) -> Vec<Effect> {
        let mut out = Vec::new();
        if !self.finishing || self.finished {
            return out;
        }
        if self.finish_acks.insert(from) {
            debug!(%from, acks = self.finish_acks.len(), "FINISH acknowledged");
        }
        if self.finish_acks.len() + 1 >= self.member_count() as usize {
            self.cancel(&mut out, Task::FinishTimeout);
            self.cancel(&mut out, Task::Finish);
            self.finish(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::message::{Message, Response, SynchToken};
    use crate::protocol::KeyAgreementProtocol;
    use crate::runtime::{Effect, ProtocolEvent};
    use crate::scheduler::Task;

    /// Two members, both holding the key; returns (member 1, member 2).
    fn pair() -> (super::StrMember, super::StrMember) {
        let mut s = member(1, 2, true);
        let mut j = member(2, 2, false);
        s.on_start();
        j.on_start();
        let effects = s.on_request(
            crate::message::Request {
                required_service: 7,
                requester_public_value: j.public_value().clone(),
            },
            ep(2),
        );
        let response = sent(&effects)
            .into_iter()
            .find_map(|m| match m {
                Message::Response(r) => Some(r.clone()),
                _ => None,
            })
            .unwrap();
        j.on_response(response, ep(1));
        (s, j)
    }

    fn token(target: u16) -> SynchToken {
        SynchToken {
            target_member_id: target,
        }
    }

    #[test]
    fn token_round_ends_in_finish() {
        let (mut s, mut j) = pair();

        let effects = s.on_synch_token(token(1), ep(2));
        assert!(has_event(&effects, |e| matches!(e, ProtocolEvent::TokenReceived { .. })));
        assert!(matches!(
            sent(&effects)[..],
            [Message::SynchToken(SynchToken { target_member_id: 2 })]
        ));

        let effects = j.on_synch_token(token(2), ep(1));
        assert!(effects.contains(&Effect::Cancel(Task::SynchToken)));
        assert!(matches!(sent(&effects)[..], [Message::Finish]));
        assert!(schedules(&effects, Task::FinishTimeout));

        let effects = s.on_finish(ep(2));
        assert!(s.is_finished());
        assert!(effects.contains(&Effect::Unicast {
            to: ep(2),
            message: Message::FinishAck
        }));
        assert_eq!(effects.last(), Some(&Effect::Terminate));

        let effects = j.on_finish_ack(ep(1));
        assert!(j.is_finished());
        assert!(effects.contains(&Effect::Cancel(Task::FinishTimeout)));
        assert_eq!(s.group_secret(), j.group_secret());
    }

    #[test]
    fn token_is_repeated_until_successor_takes_it() {
        let (_, mut j) = pair();
        let effects = j.on_timer(Task::SynchToken);
        assert!(matches!(sent(&effects)[..], [Message::SynchToken(_)]));

        // Member 1 forwards to member 2 which is us: that ends the round.
        j.on_synch_token(token(2), ep(1));
        assert!(j.on_timer(Task::SynchToken).is_empty());
    }

    #[test]
    fn forwarded_token_stops_repeat() {
        let mut m = member(1, 4, true);
        m.on_start();
        m.member_id = Some(2);
        m.synch_token_received = true;
        let mut out = Vec::new();
        m.forward_token(&mut out);
        assert!(schedules(&out, Task::SynchToken));

        // Member 3 passes it to member 4.
        let effects = m.on_synch_token(token(4), ep(3));
        assert!(effects.contains(&Effect::Cancel(Task::SynchToken)));
        assert!(m.synch_finished);
    }

    /// Sponsor admits `joiner` as `at` and returns the RESPONSE.
    fn admit(sponsor: &mut super::StrMember, joiner: &super::StrMember, at: u8) -> Response {
        let effects = sponsor.on_request(
            crate::message::Request {
                required_service: 7,
                requester_public_value: joiner.public_value().clone(),
            },
            ep(at),
        );
        sent(&effects)
            .into_iter()
            .find_map(|m| match m {
                Message::Response(r) => Some(r.clone()),
                _ => None,
            })
            .unwrap()
    }

    /// Three members, all holding the key, member 3 repeating token(1).
    fn trio() -> (super::StrMember, super::StrMember, super::StrMember) {
        let mut s = member(1, 3, true);
        let mut a = member(2, 3, false);
        let mut b = member(3, 3, false);
        s.on_start();
        let r2 = admit(&mut s, &a, 2);
        a.on_response(r2.clone(), ep(1));
        let r3 = admit(&mut a, &b, 3);
        b.on_response(r2, ep(1));
        b.on_response(r3.clone(), ep(2));
        s.on_response(r3, ep(2));
        assert!(s.group_secret().is_some());
        assert!(b.armed.contains(&Task::SynchToken));
        (s, a, b)
    }

    fn tokens_to(effects: &[Effect], target: u16) -> usize {
        sent(effects)
            .into_iter()
            .filter(|m| matches!(m, Message::SynchToken(t) if t.target_member_id == target))
            .count()
    }

    #[test]
    fn last_members_opening_token_is_not_a_handoff() {
        let (_, mut a, _) = trio();
        a.on_synch_token(token(2), ep(1));
        assert!(a.armed.contains(&Task::SynchToken));

        // Member 3 still repeats the token it opened the round with.
        let effects = a.on_synch_token(token(1), ep(3));
        assert!(effects.is_empty());
        assert!(!a.synch_finished);
        let effects = a.on_timer(Task::SynchToken);
        assert_eq!(tokens_to(&effects, 3), 1);
    }

    #[test]
    fn repeated_token_is_answered_after_handoff() {
        let (mut s, _, mut b) = trio();
        s.on_synch_token(token(1), ep(3));
        s.on_synch_token(token(3), ep(2));
        assert!(s.synch_finished);

        // Member 3 never saw the hand-off and repeats token(1).
        let effects = s.on_synch_token(token(1), ep(3));
        assert!(effects.contains(&Effect::Unicast {
            to: ep(3),
            message: Message::SynchToken(token(2)),
        }));

        let effects = b.on_synch_token(token(2), ep(1));
        assert!(effects.contains(&Effect::Cancel(Task::SynchToken)));
        assert!(b.on_timer(Task::SynchToken).is_empty());
    }

    /// Member 2's hand-off to member 3 is lost while member 1 already saw
    /// it and member 2 overhears member 3's opening token.
    #[test]
    fn lost_handoff_to_last_member_still_finishes() {
        let (mut s, mut a, mut b) = trio();
        s.on_synch_token(token(1), ep(3));
        let effects = a.on_synch_token(token(2), ep(1));
        assert_eq!(tokens_to(&effects, 3), 1);
        // ...that token(3) is lost, but member 1 overhears a repeat of it.
        s.on_synch_token(token(3), ep(2));
        assert!(s.synch_finished);
        a.on_synch_token(token(1), ep(3));

        // Member 2 keeps repeating until member 3 has it.
        let effects = a.on_timer(Task::SynchToken);
        assert_eq!(tokens_to(&effects, 3), 1);
        let effects = b.on_synch_token(token(3), ep(2));
        assert!(matches!(sent(&effects)[..], [Message::Finish]));

        for m in [&mut s, &mut a] {
            let effects = m.on_finish(ep(3));
            assert!(m.is_finished());
            b.on_finish_ack(m.local_endpoint());
            assert_eq!(effects.last(), Some(&Effect::Terminate));
        }
        assert!(b.is_finished());
        assert_eq!(s.group_secret(), b.group_secret());
        assert_eq!(a.group_secret(), b.group_secret());
    }

    #[test]
    fn finishing_member_does_not_reopen_the_round() {
        let (_, _, mut b) = trio();
        b.on_synch_token(token(3), ep(2));
        assert!(b.finishing);
        let effects = b.on_member_info_synch_response(
            crate::message::MemberInfoResponse {
                offered_service: 7,
                member_id: 1,
                public_value: crate::crypto::PublicValue::from_bytes(vec![9; 32]),
            },
            ep(1),
        );
        assert_eq!(tokens_to(&effects, 1), 0);
    }

    #[test]
    fn foreign_token_before_forwarding_is_ignored() {
        let (mut s, _) = pair();
        // Token meant for someone else while we never held it.
        let effects = s.on_synch_token(token(2), ep(2));
        assert!(effects.is_empty());
        assert!(!s.synch_finished);
    }

    #[test]
    fn incomplete_holder_requests_missing_values() {
        let mut s = member(1, 3, true);
        let j = member(2, 3, false);
        s.on_start();
        s.on_request(
            crate::message::Request {
                required_service: 7,
                requester_public_value: j.public_value().clone(),
            },
            ep(2),
        );
        // Member 3 was admitted but we missed its RESPONSE.
        let effects = s.on_synch_token(token(1), ep(3));
        assert!(matches!(
            sent(&effects)[..],
            [Message::MemberInfoSynchRequest(r)] if r.requested_member_ids == vec![3]
        ));
        assert!(schedules(&effects, Task::SynchRequest));
    }

    #[test]
    fn finish_timeout_terminates_without_acks() {
        let (_, mut j) = pair();
        let effects = j.on_synch_token(token(2), ep(1));
        assert!(schedules(&effects, Task::FinishTimeout));

        let effects = j.on_timer(Task::Finish);
        assert!(matches!(sent(&effects)[..], [Message::Finish]));

        let effects = j.on_timer(Task::FinishTimeout);
        assert!(j.is_finished());
        assert_eq!(effects.last(), Some(&Effect::Terminate));
    }

    #[test]
    fn unassigned_member_stops_on_finish() {
        let mut straggler = member(3, 2, false);
        straggler.on_start();
        let effects = straggler.on_finish(ep(2));
        assert!(straggler.is_finished());
        assert!(sent(&effects).is_empty());
        assert!(straggler.group_secret().is_none());
    }
}
