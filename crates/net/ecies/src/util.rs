//! Key and digest helpers shared by the handshake.

use alloy_primitives::B256;
use hmac::{Hmac, Mac};
use lantern_primitives::PeerId;
use secp256k1::PublicKey;
use sha2::{Digest, Sha256};

use crate::ECIESError;

/// Converts a [`PublicKey`] to a [`PeerId`] by stripping the uncompressed-key
/// tag byte.
pub fn pk2id(pk: &PublicKey) -> PeerId {
    PeerId::from_slice(&pk.serialize_uncompressed()[1..])
}

/// Converts a [`PeerId`] back to a [`PublicKey`] by re-adding the
/// uncompressed-key tag byte.
pub fn id2pk(id: PeerId) -> Result<PublicKey, ECIESError> {
    let mut s = [0u8; 65];
    // SECP256K1_TAG_PUBKEY_UNCOMPRESSED = 0x04
    s[0] = 4;
    s[1..].copy_from_slice(id.as_slice());
    Ok(PublicKey::from_slice(&s)?)
}

/// Computes SHA-256 over the input.
pub(crate) fn sha256(data: &[u8]) -> B256 {
    B256::from_slice(&Sha256::digest(data))
}

/// Computes HMAC-SHA-256 over the concatenation of the inputs.
pub(crate) fn hmac_sha256(key: &[u8], input: &[&[u8]], auth_data: &[u8]) -> B256 {
    let mut hmac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts all key sizes");
    for input in input {
        hmac.update(input);
    }
    hmac.update(auth_data);
    B256::from_slice(&hmac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{SecretKey, SECP256K1};

    #[test]
    fn pk2id2pk() {
        let prikey = SecretKey::new(&mut rand::thread_rng());
        let pubkey = PublicKey::from_secret_key(SECP256K1, &prikey);
        assert_eq!(pubkey, id2pk(pk2id(&pubkey)).unwrap());
    }
}
