//! Group key agreement over IP multicast.
//!
//! Members that only know a multicast group and a service id agree on a
//! shared group secret without a coordinator. The default
//! [`ProtocolVariant::Chained`] variant builds a chain of pairwise
//! Diffie-Hellman agreements: each member admits exactly one newcomer and
//! hands it the sponsor role. [`ProtocolVariant::Distributed`] is a star
//! where the initial sponsor hands out a random secret.
//!
//! Wire format: one type byte followed by a MessagePack body.
//! Crypto: X25519 for agreements, XChaCha20-Poly1305 for the star variant.
//!
//! The protocol state machines are pure: they consume decoded messages and
//! timer expirations and return [`Effect`]s. [`MemberRuntime`] carries the
//! effects out over a [`Transport`].

pub mod config;
pub mod crypto;
pub mod distributed;
pub mod error;
pub mod key_tree;
pub mod member;
pub mod message;
pub mod protocol;
pub mod runtime;
pub mod scheduler;
pub mod types;

pub use config::{MemberConfig, ProtocolVariant, ScatterDelay};
pub use crypto::{KeyExchange, PublicValue, Secret, X25519Exchange};
pub use distributed::DistributedMember;
pub use error::{Absorbed, DecodeError, GkaError};
pub use key_tree::{KeyTree, KeyTreeNode};
pub use member::{MemberDirectory, StrMember};
pub use message::{
    DistributedResponse, Find, MemberInfoRequest, MemberInfoResponse, Message, MessageType,
    NewSponsor, Offer, Request, Response, SynchToken,
};
pub use protocol::{dispatch, KeyAgreementProtocol, MemberStatus};
pub use runtime::{
    Effect, MemberRuntime, ProtocolEvent, RuntimeChannels, RuntimeHandle, Transport,
};
pub use scheduler::{Scheduler, Task};
pub use types::{successor, Endpoint, MemberId, ServiceId};
