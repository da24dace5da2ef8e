use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::crypto::PublicValue;
use crate::types::{Endpoint, MemberId};

/// Assigned members: who holds which id and what each contributed.
///
/// Both maps are always updated together, and an endpoint is entered at
/// most once.
#[derive(Debug, Default)]
pub struct MemberDirectory {
    by_id: BTreeMap<MemberId, PublicValue>,
    by_endpoint: HashMap<Endpoint, MemberId>,
}

impl MemberDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the member was not known yet.
    ///
    /// Re-recording a known endpoint is a no-op. A different endpoint
    /// claiming an id that is already taken is ignored.
    pub fn record(&mut self, endpoint: Endpoint, id: MemberId, public: PublicValue) -> bool {
        if self.by_endpoint.contains_key(&endpoint) {
            return false;
        }
        if self.by_id.contains_key(&id) {
            debug!(%endpoint, member_id = id, "id already held by another endpoint");
            return false;
        }
        self.by_id.insert(id, public);
        self.by_endpoint.insert(endpoint, id);
        true
    }

    pub fn public_of(&self, id: MemberId) -> Option<&PublicValue> {
        self.by_id.get(&id)
    }

    pub fn id_of(&self, endpoint: &Endpoint) -> Option<MemberId> {
        self.by_endpoint.get(endpoint).copied()
    }

    pub fn contains_id(&self, id: MemberId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn contains_endpoint(&self, endpoint: &Endpoint) -> bool {
        self.by_endpoint.contains_key(endpoint)
    }

    pub fn highest_id(&self) -> Option<MemberId> {
        self.by_id.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Ids in `range` with no recorded public value.
    pub fn missing(&self, range: impl Iterator<Item = MemberId>) -> Vec<MemberId> {
        range.filter(|id| !self.by_id.contains_key(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> Endpoint {
        Endpoint::new(std::net::Ipv4Addr::new(10, 0, 0, 1), port)
    }

    fn pv(byte: u8) -> PublicValue {
        PublicValue::from_bytes(vec![byte; 32])
    }

    #[test]
    fn record_is_idempotent_per_endpoint() {
        let mut dir = MemberDirectory::new();
        assert!(dir.record(ep(1), 1, pv(1)));
        assert!(!dir.record(ep(1), 1, pv(1)));
        assert!(!dir.record(ep(1), 5, pv(9)));
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.id_of(&ep(1)), Some(1));
        assert_eq!(dir.public_of(1), Some(&pv(1)));
    }

    #[test]
    fn conflicting_id_is_ignored() {
        let mut dir = MemberDirectory::new();
        dir.record(ep(1), 2, pv(1));
        assert!(!dir.record(ep(2), 2, pv(2)));
        assert!(!dir.contains_endpoint(&ep(2)));
        assert_eq!(dir.public_of(2), Some(&pv(1)));
    }

    #[test]
    fn missing_and_highest() {
        let mut dir = MemberDirectory::new();
        dir.record(ep(1), 1, pv(1));
        dir.record(ep(3), 3, pv(3));
        dir.record(ep(5), 5, pv(5));
        assert_eq!(dir.missing(1..=5), vec![2, 4]);
        assert_eq!(dir.highest_id(), Some(5));
        assert!(dir.missing(1..2).is_empty());
    }
}
