use proptest::prelude::*;
use std::net::Ipv4Addr;

use gka_protocol::{
    DecodeError, DistributedResponse, Endpoint, Find, MemberInfoRequest, MemberInfoResponse,
    Message, NewSponsor, Offer, PublicValue, Request, Response, SynchToken,
};

fn arb_public() -> impl Strategy<Value = PublicValue> {
    prop::collection::vec(any::<u8>(), 1..64).prop_map(PublicValue::from_bytes)
}

fn arb_endpoint() -> impl Strategy<Value = Endpoint> {
    (any::<u32>(), 1..=u16::MAX).prop_map(|(ip, port)| Endpoint::new(Ipv4Addr::from(ip), port))
}

fn arb_message() -> impl Strategy<Value = Message> {
    let service = 1..=u32::MAX;
    prop_oneof![
        service
            .clone()
            .prop_map(|required_service| Message::Find(Find { required_service })),
        service
            .clone()
            .prop_map(|offered_service| Message::Offer(Offer { offered_service })),
        (service.clone(), arb_public()).prop_map(|(required_service, pv)| {
            Message::Request(Request {
                required_service,
                requester_public_value: pv,
            })
        }),
        (
            service.clone(),
            arb_public(),
            arb_public(),
            arb_endpoint(),
            2..100u16,
            arb_public(),
            0..100u16,
        )
            .prop_map(|(s, group, pred, ep, id, pv, extra)| {
                Message::Response(Response {
                    offered_service: s,
                    new_group_public_value: group,
                    blinded_predecessor_public_value: pred,
                    new_sponsor: NewSponsor::new(ep, id, pv),
                    member_count: id + extra,
                })
            }),
        (service.clone(), prop::collection::vec(1..=u16::MAX, 1..20)).prop_map(|(s, ids)| {
            Message::MemberInfoSynchRequest(MemberInfoRequest {
                required_service: s,
                requested_member_ids: ids,
            })
        }),
        (service.clone(), 1..=u16::MAX, arb_public()).prop_map(|(s, id, pv)| {
            Message::MemberInfoResponse(MemberInfoResponse {
                offered_service: s,
                member_id: id,
                public_value: pv,
            })
        }),
        (1..=u16::MAX).prop_map(|target_member_id| Message::SynchToken(SynchToken {
            target_member_id
        })),
        Just(Message::Finish),
        Just(Message::FinishAck),
        (
            service,
            arb_public(),
            prop::collection::vec(any::<u8>(), 1..80),
            prop::collection::vec(any::<u8>(), 24..=24),
        )
            .prop_map(|(s, pv, ct, iv)| {
                Message::DistributedResponse(DistributedResponse {
                    offered_service: s,
                    sponsor_public_value: pv,
                    encrypted_group_secret: ct,
                    iv,
                })
            }),
    ]
}

proptest! {
    /// Every valid message decodes back to itself.
    #[test]
    fn valid_messages_roundtrip(msg in arb_message()) {
        let bytes = msg.encode().expect("encode");
        prop_assert_eq!(bytes[0], msg.message_type() as u8);
        let decoded = Message::decode(&bytes).expect("decode");
        prop_assert_eq!(decoded, msg);
    }

    /// Arbitrary input never panics the decoder.
    #[test]
    fn decoder_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Message::decode(&bytes);
    }

    /// Cutting a body short is reported, never misread.
    #[test]
    fn truncated_bodies_are_rejected(msg in arb_message(), cut in any::<prop::sample::Index>()) {
        let bytes = msg.encode().expect("encode");
        prop_assume!(bytes.len() > 1);
        let len = 1 + cut.index(bytes.len() - 1);
        prop_assert!(Message::decode(&bytes[..len]).is_err());
    }

    /// Type bytes outside 1..=12 are unknown.
    #[test]
    fn unknown_type_bytes(tag in 13..=u8::MAX, body in prop::collection::vec(any::<u8>(), 0..32)) {
        let mut bytes = vec![tag];
        bytes.extend(body);
        prop_assert_eq!(Message::decode(&bytes), Err(DecodeError::UnknownType(tag)));
    }
}

#[test]
fn reserved_zero_type_is_unknown() {
    assert_eq!(Message::decode(&[0]), Err(DecodeError::UnknownType(0)));
}
