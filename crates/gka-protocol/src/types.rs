pub use gka_transport::Endpoint;

/// Identifies the group being negotiated. Always positive on the wire.
pub type ServiceId = u32;

/// Position of a member in the admission chain, starting at 1.
/// Zero is never a valid id.
pub type MemberId = u16;

/// Id of the member that receives the synchronization token after `id`.
pub fn successor(id: MemberId, member_count: u16) -> MemberId {
    if member_count == 0 {
        return 1;
    }
    (id % member_count) + 1
}
