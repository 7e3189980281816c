//! Id-related test fixtures.

use bytes::Bytes;
use rand::Rng;
use wotfetch_api::{id::Id, IdentityId};

/// A random 32 byte id.
pub fn random_id() -> Id {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    Id(Bytes::from(bytes.to_vec()))
}

/// A random identity id.
pub fn random_identity_id() -> IdentityId {
    IdentityId(random_id())
}

/// A list of random identity ids.
pub fn create_identity_id_list(num: u16) -> Vec<IdentityId> {
    (0..num).map(|_| random_identity_id()).collect()
}

/// Random payload bytes.
pub fn random_bytes(len: usize) -> Bytes {
    let mut rng = rand::thread_rng();
    let mut out = vec![0u8; len];
    rng.fill(&mut out[..]);
    Bytes::from(out)
}
