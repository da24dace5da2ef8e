//! Capability trait shared by the protocol variants.
//!
//! Every handler has a no-op default, so a variant only implements the
//! messages it takes part in. [`dispatch`] is the single entry point for
//! inbound datagrams.
use tracing::{debug, trace};

use crate::crypto::Secret;
use crate::message::{
    DistributedResponse, Find, MemberInfoRequest, MemberInfoResponse, Message, Offer, Request,
    Response, SynchToken,
};
use crate::runtime::Effect;
use crate::scheduler::Task;
use crate::types::{Endpoint, MemberId};

/// Point-in-time view of a member, safe to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberStatus {
    pub member_id: Option<MemberId>,
    pub is_sponsor: bool,
    pub keys_computed: u16,
    pub finished: bool,
    /// Redacted group secret, once established.
    pub group_key: Option<String>,
}

pub trait KeyAgreementProtocol: Send {
    /// The endpoint our own datagrams carry as sender.
    fn local_endpoint(&self) -> Endpoint;

    /// First effects after construction.
    fn on_start(&mut self) -> Vec<Effect>;

    /// A scheduled task reached its deadline.
    fn on_timer(&mut self, task: Task) -> Vec<Effect>;

    fn on_find(&mut self, _msg: Find, _from: Endpoint) -> Vec<Effect> {
        Vec::new()
    }

    fn on_offer(&mut self, _msg: Offer, _from: Endpoint) -> Vec<Effect> {
        Vec::new()
    }

    fn on_request(&mut self, _msg: Request, _from: Endpoint) -> Vec<Effect> {
        Vec::new()
    }

    fn on_response(&mut self, _msg: Response, _from: Endpoint) -> Vec<Effect> {
        Vec::new()
    }

    fn on_member_info_request(&mut self, _msg: MemberInfoRequest, _from: Endpoint) -> Vec<Effect> {
        Vec::new()
    }

    fn on_member_info_response(
        &mut self,
        _msg: MemberInfoResponse,
        _from: Endpoint,
    ) -> Vec<Effect> {
        Vec::new()
    }

    fn on_member_info_synch_request(
        &mut self,
        _msg: MemberInfoRequest,
        _from: Endpoint,
    ) -> Vec<Effect> {
        Vec::new()
    }

    fn on_member_info_synch_response(
        &mut self,
        _msg: MemberInfoResponse,
        _from: Endpoint,
    ) -> Vec<Effect> {
        Vec::new()
    }

    fn on_synch_token(&mut self, _msg: SynchToken, _from: Endpoint) -> Vec<Effect> {
        Vec::new()
    }

    fn on_finish(&mut self, _from: Endpoint) -> Vec<Effect> {
        Vec::new()
    }

    fn on_finish_ack(&mut self, _from: Endpoint) -> Vec<Effect> {
        Vec::new()
    }

    fn on_distributed_response(
        &mut self,
        _msg: DistributedResponse,
        _from: Endpoint,
    ) -> Vec<Effect> {
        Vec::new()
    }

    /// The agreed group secret, once this member holds all of it.
    fn group_secret(&self) -> Option<&Secret>;

    fn member_id(&self) -> Option<MemberId>;

    fn is_finished(&self) -> bool;

    fn status(&self) -> MemberStatus {
        MemberStatus {
            member_id: self.member_id(),
            is_sponsor: false,
            keys_computed: 0,
            finished: self.is_finished(),
            group_key: self.group_secret().map(Secret::short_repr),
        }
    }
}

/// Decode a datagram and route it to the matching handler.
///
/// Our own multicast echoes and undecodable datagrams are dropped.
pub fn dispatch<P: KeyAgreementProtocol + ?Sized>(
    protocol: &mut P,
    bytes: &[u8],
    from: Endpoint,
) -> Vec<Effect> {
    if from == protocol.local_endpoint() {
        trace!(%from, "dropping loopback datagram");
        return Vec::new();
    }

    let message = match Message::decode(bytes) {
        Ok(message) => message,
        Err(e) => {
            debug!(%from, len = bytes.len(), error = %e, "dropping datagram");
            return Vec::new();
        }
    };
    trace!(%from, kind = %message.message_type(), "received");

    match message {
        Message::Find(m) => protocol.on_find(m, from),
        Message::Offer(m) => protocol.on_offer(m, from),
        Message::Request(m) => protocol.on_request(m, from),
        Message::Response(m) => protocol.on_response(m, from),
        Message::MemberInfoRequest(m) => protocol.on_member_info_request(m, from),
        Message::MemberInfoResponse(m) => protocol.on_member_info_response(m, from),
        Message::MemberInfoSynchRequest(m) => protocol.on_member_info_synch_request(m, from),
        Message::MemberInfoSynchResponse(m) => protocol.on_member_info_synch_response(m, from),
        Message::SynchToken(m) => protocol.on_synch_token(m, from),
        Message::Finish => protocol.on_finish(from),
        Message::FinishAck => protocol.on_finish_ack(from),
        Message::DistributedResponse(m) => protocol.on_distributed_response(m, from),
    }
}
