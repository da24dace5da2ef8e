//! Wire messages.
//!
//! Every datagram is one discriminant byte followed by a MessagePack body
//! (positional, so field order is part of the format). Byte strings are
//! length-prefixed; IPv4 addresses travel as exactly four octets. Decoding
//! rejects out-of-range fields instead of clamping them.
use std::fmt;
use std::net::Ipv4Addr;

use gka_metrics::CountMetric;
use serde::{Deserialize, Serialize};

use crate::crypto::PublicValue;
use crate::error::DecodeError;
use crate::types::{Endpoint, MemberId, ServiceId};
use crate::GkaError;

/// One-byte discriminant. Zero is reserved and never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Find = 1,
    Offer = 2,
    Request = 3,
    Response = 4,
    MemberInfoRequest = 5,
    MemberInfoResponse = 6,
    MemberInfoSynchRequest = 7,
    MemberInfoSynchResponse = 8,
    SynchToken = 9,
    Finish = 10,
    FinishAck = 11,
    DistributedResponse = 12,
}

impl MessageType {
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Find => "FIND",
            MessageType::Offer => "OFFER",
            MessageType::Request => "REQUEST",
            MessageType::Response => "RESPONSE",
            MessageType::MemberInfoRequest => "MEMBER_INFO_REQUEST",
            MessageType::MemberInfoResponse => "MEMBER_INFO_RESPONSE",
            MessageType::MemberInfoSynchRequest => "MEMBER_INFO_SYNCH_REQUEST",
            MessageType::MemberInfoSynchResponse => "MEMBER_INFO_SYNCH_RESPONSE",
            MessageType::SynchToken => "SYNCH_TOKEN",
            MessageType::Finish => "FINISH",
            MessageType::FinishAck => "FINISH_ACK",
            MessageType::DistributedResponse => "DISTRIBUTED_RESPONSE",
        }
    }

    /// Statistics counter bumped when a message of this type is sent.
    pub fn count_metric(self) -> CountMetric {
        match self {
            MessageType::Find => CountMetric::FindMessageCount,
            MessageType::Offer => CountMetric::OfferMessageCount,
            MessageType::Request => CountMetric::RequestMessageCount,
            MessageType::Response => CountMetric::ResponseMessageCount,
            MessageType::MemberInfoRequest => CountMetric::MemberInfoRequestMessageCount,
            MessageType::MemberInfoResponse => CountMetric::MemberInfoResponseMessageCount,
            MessageType::MemberInfoSynchRequest => {
                CountMetric::MemberInfoSynchRequestMessageCount
            }
            MessageType::MemberInfoSynchResponse => {
                CountMetric::MemberInfoSynchResponseMessageCount
            }
            MessageType::SynchToken => CountMetric::SynchTokenMessageCount,
            MessageType::Finish => CountMetric::FinishMessageCount,
            MessageType::FinishAck => CountMetric::FinishAckMessageCount,
            MessageType::DistributedResponse => CountMetric::DistributedResponseMessageCount,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => MessageType::Find,
            2 => MessageType::Offer,
            3 => MessageType::Request,
            4 => MessageType::Response,
            5 => MessageType::MemberInfoRequest,
            6 => MessageType::MemberInfoResponse,
            7 => MessageType::MemberInfoSynchRequest,
            8 => MessageType::MemberInfoSynchResponse,
            9 => MessageType::SynchToken,
            10 => MessageType::Finish,
            11 => MessageType::FinishAck,
            12 => MessageType::DistributedResponse,
            other => return Err(DecodeError::UnknownType(other)),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Bodies ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Find {
    pub required_service: ServiceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub offered_service: ServiceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub required_service: ServiceId,
    pub requester_public_value: PublicValue,
}

/// The member a sponsor has just admitted and handed the sponsor role to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSponsor {
    #[serde(with = "ipv4_octets")]
    pub ip: Ipv4Addr,
    pub port: u16,
    pub assigned_id: MemberId,
    pub public_value: PublicValue,
}

impl NewSponsor {
    pub fn new(endpoint: Endpoint, assigned_id: MemberId, public_value: PublicValue) -> Self {
        Self {
            ip: *endpoint.ip(),
            port: endpoint.port(),
            assigned_id,
            public_value,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub offered_service: ServiceId,
    /// Root public value before the new member was added.
    pub new_group_public_value: PublicValue,
    /// The outgoing sponsor's own contribution.
    pub blinded_predecessor_public_value: PublicValue,
    pub new_sponsor: NewSponsor,
    /// Group size the outgoing sponsor was configured with.
    pub member_count: u16,
}

/// Also used as the body of `MEMBER_INFO_SYNCH_REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfoRequest {
    pub required_service: ServiceId,
    pub requested_member_ids: Vec<MemberId>,
}

/// Also used as the body of `MEMBER_INFO_SYNCH_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfoResponse {
    pub offered_service: ServiceId,
    pub member_id: MemberId,
    pub public_value: PublicValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchToken {
    pub target_member_id: MemberId,
}

/// Star-topology admission: the group secret encrypted for one requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedResponse {
    pub offered_service: ServiceId,
    pub sponsor_public_value: PublicValue,
    #[serde(with = "serde_bytes")]
    pub encrypted_group_secret: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub iv: Vec<u8>,
}

// ── Message ─────────────────────────────────────────────────────────

/// The closed set of protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Find(Find),
    Offer(Offer),
    Request(Request),
    Response(Response),
    MemberInfoRequest(MemberInfoRequest),
    MemberInfoResponse(MemberInfoResponse),
    MemberInfoSynchRequest(MemberInfoRequest),
    MemberInfoSynchResponse(MemberInfoResponse),
    SynchToken(SynchToken),
    Finish,
    FinishAck,
    DistributedResponse(DistributedResponse),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Find(_) => MessageType::Find,
            Message::Offer(_) => MessageType::Offer,
            Message::Request(_) => MessageType::Request,
            Message::Response(_) => MessageType::Response,
            Message::MemberInfoRequest(_) => MessageType::MemberInfoRequest,
            Message::MemberInfoResponse(_) => MessageType::MemberInfoResponse,
            Message::MemberInfoSynchRequest(_) => MessageType::MemberInfoSynchRequest,
            Message::MemberInfoSynchResponse(_) => MessageType::MemberInfoSynchResponse,
            Message::SynchToken(_) => MessageType::SynchToken,
            Message::Finish => MessageType::Finish,
            Message::FinishAck => MessageType::FinishAck,
            Message::DistributedResponse(_) => MessageType::DistributedResponse,
        }
    }

    /// Serialize to discriminant + MessagePack body.
    pub fn encode(&self) -> Result<Vec<u8>, GkaError> {
        let mut out = vec![self.message_type() as u8];
        match self {
            Message::Find(body) => rmp_serde::encode::write(&mut out, body)?,
            Message::Offer(body) => rmp_serde::encode::write(&mut out, body)?,
            Message::Request(body) => rmp_serde::encode::write(&mut out, body)?,
            Message::Response(body) => rmp_serde::encode::write(&mut out, body)?,
            Message::MemberInfoRequest(body) | Message::MemberInfoSynchRequest(body) => {
                rmp_serde::encode::write(&mut out, body)?
            }
            Message::MemberInfoResponse(body) | Message::MemberInfoSynchResponse(body) => {
                rmp_serde::encode::write(&mut out, body)?
            }
            Message::SynchToken(body) => rmp_serde::encode::write(&mut out, body)?,
            Message::Finish | Message::FinishAck => {}
            Message::DistributedResponse(body) => rmp_serde::encode::write(&mut out, body)?,
        }
        Ok(out)
    }

    /// Parse and validate a datagram.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (&tag, body) = bytes
            .split_first()
            .ok_or_else(|| DecodeError::MalformedMessage {
                reason: "empty datagram".into(),
            })?;

        let message = match MessageType::try_from(tag)? {
            MessageType::Find => Message::Find(rmp_serde::from_slice(body)?),
            MessageType::Offer => Message::Offer(rmp_serde::from_slice(body)?),
            MessageType::Request => Message::Request(rmp_serde::from_slice(body)?),
            MessageType::Response => Message::Response(rmp_serde::from_slice(body)?),
            MessageType::MemberInfoRequest => {
                Message::MemberInfoRequest(rmp_serde::from_slice(body)?)
            }
            MessageType::MemberInfoResponse => {
                Message::MemberInfoResponse(rmp_serde::from_slice(body)?)
            }
            MessageType::MemberInfoSynchRequest => {
                Message::MemberInfoSynchRequest(rmp_serde::from_slice(body)?)
            }
            MessageType::MemberInfoSynchResponse => {
                Message::MemberInfoSynchResponse(rmp_serde::from_slice(body)?)
            }
            MessageType::SynchToken => Message::SynchToken(rmp_serde::from_slice(body)?),
            MessageType::Finish => Message::Finish,
            MessageType::FinishAck => Message::FinishAck,
            MessageType::DistributedResponse => {
                Message::DistributedResponse(rmp_serde::from_slice(body)?)
            }
        };

        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        match self {
            Message::Find(m) => service("required_service", m.required_service),
            Message::Offer(m) => service("offered_service", m.offered_service),
            Message::Request(m) => {
                service("required_service", m.required_service)?;
                public("requester_public_value", &m.requester_public_value)
            }
            Message::Response(m) => {
                service("offered_service", m.offered_service)?;
                public("new_group_public_value", &m.new_group_public_value)?;
                public(
                    "blinded_predecessor_public_value",
                    &m.blinded_predecessor_public_value,
                )?;
                public("new_sponsor.public_value", &m.new_sponsor.public_value)?;
                if m.new_sponsor.port == 0 {
                    return Err(invalid("new_sponsor.port", "must be non-zero"));
                }
                // The first member is never admitted by anyone.
                if m.new_sponsor.assigned_id < 2 {
                    return Err(invalid("new_sponsor.assigned_id", "must be at least 2"));
                }
                if m.member_count < m.new_sponsor.assigned_id {
                    return Err(invalid(
                        "member_count",
                        "must not be smaller than the assigned id",
                    ));
                }
                Ok(())
            }
            Message::MemberInfoRequest(m) | Message::MemberInfoSynchRequest(m) => {
                service("required_service", m.required_service)?;
                if m.requested_member_ids.is_empty() {
                    return Err(invalid("requested_member_ids", "must not be empty"));
                }
                m.requested_member_ids
                    .iter()
                    .try_for_each(|id| member_id("requested_member_ids", *id))
            }
            Message::MemberInfoResponse(m) | Message::MemberInfoSynchResponse(m) => {
                service("offered_service", m.offered_service)?;
                member_id("member_id", m.member_id)?;
                public("public_value", &m.public_value)
            }
            Message::SynchToken(m) => member_id("target_member_id", m.target_member_id),
            Message::Finish | Message::FinishAck => Ok(()),
            Message::DistributedResponse(m) => {
                service("offered_service", m.offered_service)?;
                public("sponsor_public_value", &m.sponsor_public_value)?;
                if m.encrypted_group_secret.is_empty() {
                    return Err(invalid("encrypted_group_secret", "must not be empty"));
                }
                if m.iv.is_empty() {
                    return Err(invalid("iv", "must not be empty"));
                }
                Ok(())
            }
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> DecodeError {
    DecodeError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn service(field: &'static str, id: ServiceId) -> Result<(), DecodeError> {
    if id == 0 {
        return Err(invalid(field, "service id must be positive"));
    }
    Ok(())
}

fn member_id(field: &'static str, id: MemberId) -> Result<(), DecodeError> {
    if id == 0 {
        return Err(invalid(field, "member id must be positive"));
    }
    Ok(())
}

fn public(field: &'static str, value: &PublicValue) -> Result<(), DecodeError> {
    if value.is_empty() {
        return Err(invalid(field, "public value must not be empty"));
    }
    Ok(())
}

/// IPv4 address as a length-prefixed byte string of exactly four octets.
mod ipv4_octets {
    use std::net::Ipv4Addr;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ip: &Ipv4Addr, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&ip.octets())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Ipv4Addr, D::Error> {
        let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;
        let octets: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| D::Error::invalid_length(bytes.len(), &"4 octets"))?;
        Ok(Ipv4Addr::from(octets))
    }
}
