//! Sponsor side: answering discovery and admitting candidates.
use tracing::{debug, info, warn};

use crate::crypto::PublicValue;
use crate::error::Absorbed;
use crate::message::{
    Find, MemberInfoRequest, MemberInfoResponse, Message, NewSponsor, Request, Response,
};
use crate::runtime::{Effect, ProtocolEvent};
use crate::scheduler::Task;
use crate::types::Endpoint;
use crate::GkaError;

use super::StrMember;

impl StrMember {
    /// Admission is still open.
    pub(super) fn accepting(&self) -> bool {
        self.is_sponsor && self.member_id < Some(self.member_count())
    }

    pub(super) fn handle_find(&mut self, msg: Find, from: Endpoint) -> Vec<Effect> {
        let mut out = Vec::new();
        if !self.serves(msg.required_service) || !self.accepting() {
            return out;
        }
        debug!(%from, "answering FIND");
        let offer = self.offer();
        self.multicast(&mut out, offer);
        out
    }

    pub(super) fn handle_request(&mut self, msg: Request, from: Endpoint) -> Vec<Effect> {
        let mut out = Vec::new();
        if !self.serves(msg.required_service) || self.finished {
            return out;
        }
        if self.members.contains_endpoint(&from) {
            Absorbed::DuplicateAdmission { endpoint: from }.log();
            return out;
        }
        if !self.pending.contains_key(&from) {
            debug!(%from, "join candidate");
            self.pending.insert(from, msg.requester_public_value);
        }
        if self.is_sponsor {
            self.admit_next(&mut out);
        }
        out
    }

    /// Admit the oldest pending candidate once every predecessor is known,
    /// otherwise keep asking for predecessors or keep offering.
    pub(super) fn admit_next(&mut self, out: &mut Vec<Effect>) {
        if !self.accepting() {
            return;
        }

        let missing = self.missing_predecessors();
        if !missing.is_empty() {
            debug!(?missing, "deferring admission until predecessors are known");
            let request = self.info_request(missing);
            self.repeat(out, Task::MemberInfoRequest, Message::MemberInfoRequest(request));
            return;
        }
        self.cancel(out, Task::MemberInfoRequest);

        while let Some((endpoint, public)) = self.pending.shift_remove_index(0) {
            if self.members.contains_endpoint(&endpoint) {
                continue;
            }
            match self.admit(out, endpoint, &public) {
                Ok(()) => return,
                Err(e) => warn!(%endpoint, error = %e, "candidate rejected"),
            }
        }

        let offer = self.offer();
        self.repeat(out, Task::Offer, offer);
    }

    /// Extend the chain with `candidate` and hand the sponsor role over.
    fn admit(
        &mut self,
        out: &mut Vec<Effect>,
        candidate: Endpoint,
        public: &PublicValue,
    ) -> Result<(), GkaError> {
        let id = self
            .member_id
            .ok_or_else(|| GkaError::Crypto("sponsor without a member id".into()))?;
        let kx = self.kx.as_ref();
        let tree = self
            .tree
            .as_mut()
            .ok_or_else(|| GkaError::Crypto("sponsor without a key tree".into()))?;

        let derived = tree.head().root_public().is_none();
        let old_root_public = tree.root_public(kx)?;
        tree.extend(public, kx, false)?;
        if derived {
            self.crypto_op();
        }
        self.crypto_op();

        let assigned_id = id
            .checked_add(1)
            .ok_or_else(|| GkaError::InvalidConfig("member id space exhausted".into()))?;
        self.keys_computed += 1;
        self.is_sponsor = false;
        self.admitted = Some(candidate);
        self.higher_member_id_assigned = false;
        self.members.record(candidate, assigned_id, public.clone());
        self.pending.shift_remove(&candidate);
        info!(member_id = assigned_id, endpoint = %candidate, "admitted new sponsor");

        let response = Response {
            offered_service: self.service(),
            new_group_public_value: old_root_public,
            blinded_predecessor_public_value: self.public.clone(),
            new_sponsor: NewSponsor::new(candidate, assigned_id, public.clone()),
            member_count: self.member_count(),
        };
        self.last_response = Some(response.clone());

        self.cancel(out, Task::Offer);
        self.cancel(out, Task::MemberInfoRequest);
        out.push(Effect::Emit(ProtocolEvent::Admitted {
            member_id: assigned_id,
            endpoint: candidate,
        }));
        self.key_computed(out);
        self.repeat(out, Task::Response, Message::Response(response));
        self.check_complete(out);
        Ok(())
    }

    /// MEMBER_INFO_REQUEST and MEMBER_INFO_SYNCH_REQUEST.
    pub(super) fn handle_member_info_request(
        &mut self,
        msg: MemberInfoRequest,
        from: Endpoint,
        synch: bool,
    ) -> Vec<Effect> {
        let mut out = Vec::new();
        if !self.serves(msg.required_service) || self.finished {
            return out;
        }
        let Some(id) = self.member_id else {
            return out;
        };
        self.note_assigned_sender(from);

        if synch && self.members.id_of(&from) == self.successor() {
            // Our successor is catching up, so it holds the token.
            self.successor_has_token(&mut out);
        }
        if msg.requested_member_ids.contains(&id) {
            let task = if synch {
                Task::SynchResponse
            } else {
                Task::MemberInfoResponse
            };
            self.schedule(&mut out, task);
        }
        out
    }

    /// MEMBER_INFO_RESPONSE and MEMBER_INFO_SYNCH_RESPONSE.
    pub(super) fn handle_member_info_response(
        &mut self,
        msg: MemberInfoResponse,
        from: Endpoint,
    ) -> Vec<Effect> {
        let mut out = Vec::new();
        if !self.serves(msg.offered_service) || self.finished {
            return out;
        }
        self.note_assigned_sender(from);
        self.record_member(from, msg.member_id, msg.public_value);

        if self.member_id.is_none() {
            return out;
        }
        if self.is_sponsor {
            self.admit_next(&mut out);
        } else {
            self.cascade(&mut out);
            self.advance_synch(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::message::{MemberInfoResponse, Message, Request};
    use crate::protocol::KeyAgreementProtocol;
    use crate::runtime::{Effect, ProtocolEvent};
    use crate::scheduler::Task;

    fn request_from(m: &super::StrMember) -> Request {
        Request {
            required_service: 7,
            requester_public_value: m.public_value().clone(),
        }
    }

    #[test]
    fn sponsor_answers_find_with_offer() {
        let mut s = member(1, 3, true);
        s.on_start();
        let effects = s.on_find(crate::message::Find { required_service: 7 }, ep(2));
        assert!(matches!(sent(&effects)[..], [Message::Offer(_)]));

        let effects = s.on_find(crate::message::Find { required_service: 8 }, ep(2));
        assert!(effects.is_empty());
    }

    #[test]
    fn request_admits_candidate_and_hands_over() {
        let mut s = member(1, 3, true);
        let j = member(2, 3, false);
        s.on_start();

        let effects = s.on_request(request_from(&j), ep(2));
        let Some(Message::Response(response)) = sent(&effects).into_iter().next().cloned() else {
            panic!("expected RESPONSE, got {effects:?}");
        };
        assert_eq!(response.new_sponsor.assigned_id, 2);
        assert_eq!(response.new_sponsor.endpoint(), ep(2));
        assert_eq!(&response.blinded_predecessor_public_value, s.public_value());
        assert_eq!(response.member_count, 3);
        assert!(!s.is_sponsor());
        assert_eq!(s.keys_computed(), 2);
        assert!(schedules(&effects, Task::Response));
        assert!(has_event(&effects, |e| matches!(
            e,
            ProtocolEvent::Admitted { member_id: 2, .. }
        )));
    }

    #[test]
    fn duplicate_request_is_absorbed() {
        let mut s = member(1, 3, true);
        let j = member(2, 3, false);
        s.on_start();
        s.on_request(request_from(&j), ep(2));

        let effects = s.on_request(request_from(&j), ep(2));
        assert!(effects.is_empty());
        assert_eq!(s.keys_computed(), 2);
        assert_eq!(s.members().len(), 2);
    }

    #[test]
    fn oldest_candidate_wins() {
        let mut s = member(1, 3, false);
        let a = member(2, 3, false);
        let b = member(3, 3, false);
        // Not a sponsor yet: candidates only queue up.
        s.on_request(request_from(&a), ep(2));
        s.on_request(request_from(&b), ep(3));
        assert_eq!(s.pending_len(), 2);

        let mut s2 = member(1, 3, true);
        s2.on_start();
        s2.pending = s.pending.clone();
        let mut out = Vec::new();
        s2.admit_next(&mut out);
        assert_eq!(s2.members().id_of(&ep(2)), Some(2));
        assert_eq!(s2.members().id_of(&ep(3)), None);
        // The runner-up stays queued for the next sponsor.
        assert_eq!(s2.pending_len(), 1);
    }

    #[test]
    fn rejected_candidate_falls_through_to_offer() {
        let mut s = member(1, 3, true);
        s.on_start();
        let bad = Request {
            required_service: 7,
            requester_public_value: crate::crypto::PublicValue::from_bytes(vec![1, 2, 3]),
        };
        let effects = s.on_request(bad, ep(2));
        assert!(s.is_sponsor());
        assert_eq!(s.keys_computed(), 1);
        // OFFER is already armed from start, so nothing is re-sent.
        assert!(sent(&effects).is_empty());
        assert_eq!(s.pending_len(), 0);
    }

    /// Member 3 of 4 that just took over without knowing members 1 and 2.
    fn third_sponsor() -> super::StrMember {
        let mut s = member(3, 4, false);
        s.member_id = Some(3);
        s.is_sponsor = true;
        s.keys_computed = 1;
        s.tree = Some(crate::key_tree::KeyTree::build(
            s.secret.clone(),
            None,
            Some(s.secret.clone()),
            s.public.clone(),
        ));
        s
    }

    fn info(id: u16, m: &super::StrMember) -> MemberInfoResponse {
        MemberInfoResponse {
            offered_service: 7,
            member_id: id,
            public_value: m.public_value().clone(),
        }
    }

    #[test]
    fn sponsor_defers_until_predecessors_known() {
        let mut s = third_sponsor();
        let j = member(4, 4, false);

        let effects = s.on_request(request_from(&j), ep(4));
        let Some(Message::MemberInfoRequest(req)) = sent(&effects).into_iter().next().cloned()
        else {
            panic!("expected MEMBER_INFO_REQUEST, got {effects:?}");
        };
        assert_eq!(req.requested_member_ids, vec![1, 2]);
        assert_eq!(s.pending_len(), 1);

        let p1 = member(1, 4, false);
        let p2 = member(2, 4, false);
        s.on_member_info_response(
            MemberInfoResponse {
                offered_service: 7,
                member_id: 1,
                public_value: p1.public_value().clone(),
            },
            ep(1),
        );
        let effects = s.on_member_info_response(
            MemberInfoResponse {
                offered_service: 7,
                member_id: 2,
                public_value: p2.public_value().clone(),
            },
            ep(2),
        );
        assert!(effects.contains(&Effect::Cancel(Task::MemberInfoRequest)));
        assert_eq!(s.members().id_of(&ep(4)), Some(4));
        assert!(s.group_secret().is_some());
    }

    #[test]
    fn answers_member_info_request_for_own_id_once() {
        let mut s = member(1, 3, true);
        s.on_start();
        let req = crate::message::MemberInfoRequest {
            required_service: 7,
            requested_member_ids: vec![1],
        };
        let effects = s.on_member_info_request(req.clone(), ep(3));
        assert!(schedules(&effects, Task::MemberInfoResponse));
        assert!(s.on_member_info_request(req, ep(3)).is_empty());

        let effects = s.on_timer(Task::MemberInfoResponse);
        assert!(matches!(
            sent(&effects)[..],
            [Message::MemberInfoResponse(MemberInfoResponse { member_id: 1, .. })]
        ));
        assert!(!schedules(&effects, Task::MemberInfoResponse));
    }

    /// The only candidate turns out to be member 2, overheard before it was
    /// admitted. Once predecessors are known the sponsor must offer again.
    #[test]
    fn stale_candidate_falls_back_to_offer_after_info_responses() {
        let mut s = third_sponsor();
        let p1 = member(1, 4, false);
        let p2 = member(2, 4, false);
        s.on_request(request_from(&p2), ep(2));
        assert_eq!(s.pending_len(), 1);

        s.on_member_info_response(info(1, &p1), ep(1));
        let effects = s.on_member_info_response(info(2, &p2), ep(2));
        assert_eq!(s.pending_len(), 0);
        assert!(s.is_sponsor());
        assert!(matches!(sent(&effects)[..], [Message::Offer(_)]));
        assert!(schedules(&effects, Task::Offer));
    }

    #[test]
    fn stale_candidate_falls_back_to_offer_after_response() {
        let mut s = third_sponsor();
        let p1 = member(1, 4, false);
        let p2 = member(2, 4, false);
        s.on_request(request_from(&p2), ep(2));

        // A repeated RESPONSE from member 1 admitting member 2.
        let response = crate::message::Response {
            offered_service: 7,
            new_group_public_value: p1.public_value().clone(),
            blinded_predecessor_public_value: p1.public_value().clone(),
            new_sponsor: crate::message::NewSponsor::new(ep(2), 2, p2.public_value().clone()),
            member_count: 4,
        };
        let effects = s.on_response(response, ep(1));
        assert_eq!(s.pending_len(), 0);
        assert!(matches!(sent(&effects)[..], [Message::Offer(_)]));
    }

    #[test]
    fn info_request_timer_offers_once_predecessors_are_known() {
        let mut s = third_sponsor();
        let p1 = member(1, 4, false);
        let p2 = member(2, 4, false);
        s.on_request(request_from(&p2), ep(2));
        assert!(s.armed.contains(&Task::MemberInfoRequest));

        // Learned without passing through a handler that re-checks admission.
        s.record_member(ep(1), 1, p1.public_value().clone());
        s.record_member(ep(2), 2, p2.public_value().clone());

        let effects = s.on_timer(Task::MemberInfoRequest);
        assert!(matches!(sent(&effects)[..], [Message::Offer(_)]));
        assert!(schedules(&effects, Task::Offer));
        assert!(!s.armed.contains(&Task::MemberInfoRequest));
    }

    #[test]
    fn info_request_timer_repeats_while_predecessors_missing() {
        let mut s = third_sponsor();
        let j = member(4, 4, false);
        s.on_request(request_from(&j), ep(4));

        let effects = s.on_timer(Task::MemberInfoRequest);
        assert!(matches!(
            sent(&effects)[..],
            [Message::MemberInfoRequest(r)] if r.requested_member_ids == vec![1, 2]
        ));
        assert!(schedules(&effects, Task::MemberInfoRequest));
    }
}
