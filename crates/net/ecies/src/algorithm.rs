//! The ECIES handshake and frame cipher state machine.

#![allow(missing_docs)]

use crate::{
    error::ECIESError,
    mac::{HeaderBytes, MAC},
    util::{hmac_sha256, id2pk, pk2id, sha256},
};
use aes::{Aes128, Aes256};
use alloy_primitives::{B128, B256};
use alloy_rlp::{Decodable, Encodable, RlpEncodable};
use bytes::{BufMut, Bytes, BytesMut};
use cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr64BE;
use lantern_primitives::PeerId;
use rand::Rng;
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, SecretKey, SECP256K1,
};
use sha3::{Digest, Keccak256};

const PROTOCOL_VERSION: u8 = 4;

/// Computes the shared secret with ECDH and strips the y coordinate.
fn ecdh_x(public_key: &PublicKey, secret_key: &SecretKey) -> B256 {
    B256::from_slice(&secp256k1::ecdh::shared_secret_point(public_key, secret_key)[..32])
}

/// The NIST SP 800-56 concatenation KDF over SHA-256, specialized to the two
/// rounds the handshake needs.
fn kdf(secret: B256, s1: &[u8], dest: &mut [u8]) {
    let mut ctr = 1_u32;
    let mut written = 0_usize;
    while written < dest.len() {
        let mut hasher = sha2::Sha256::default();
        hasher.update(ctr.to_be_bytes());
        hasher.update(secret.as_slice());
        hasher.update(s1);
        let d = sha2::Digest::finalize(hasher);
        let n = core::cmp::min(32, dest.len() - written);
        dest[written..written + n].copy_from_slice(&d[..n]);
        written += n;
        ctr += 1;
    }
}

/// The ECIES connection state: identity and ephemeral keys, nonces, and once
/// the handshake completes, the per-direction AES-CTR ciphers and keccak MAC
/// states used for every frame.
pub struct ECIES {
    secret_key: SecretKey,
    public_key: PublicKey,
    remote_public_key: Option<PublicKey>,

    remote_id: Option<PeerId>,

    ephemeral_secret_key: SecretKey,
    ephemeral_public_key: PublicKey,
    ephemeral_shared_secret: Option<B256>,
    remote_ephemeral_public_key: Option<PublicKey>,

    nonce: B256,
    remote_nonce: Option<B256>,

    init_msg: Option<Bytes>,
    remote_init_msg: Option<Bytes>,

    body_size: Option<usize>,

    egress_aes: Option<Ctr64BE<Aes256>>,
    ingress_aes: Option<Ctr64BE<Aes256>>,
    egress_mac: Option<MAC>,
    ingress_mac: Option<MAC>,
}

impl core::fmt::Debug for ECIES {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ECIES")
            .field("public_key", &self.public_key)
            .field("remote_id", &self.remote_id)
            .finish_non_exhaustive()
    }
}

impl ECIES {
    /// Creates the initiator side of a connection to `remote_id`, with a
    /// fresh ephemeral key and nonce.
    pub fn new_client(secret_key: SecretKey, remote_id: PeerId) -> Result<Self, ECIESError> {
        let nonce = B256::random();
        let ephemeral_secret_key = SecretKey::new(&mut rand::thread_rng());
        Self::new_static_client(secret_key, remote_id, nonce, ephemeral_secret_key)
    }

    /// Creates the initiator side with caller-supplied nonce and ephemeral
    /// key, for deterministic tests.
    pub fn new_static_client(
        secret_key: SecretKey,
        remote_id: PeerId,
        nonce: B256,
        ephemeral_secret_key: SecretKey,
    ) -> Result<Self, ECIESError> {
        let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);
        let remote_public_key = id2pk(remote_id)?;
        let ephemeral_public_key = PublicKey::from_secret_key(SECP256K1, &ephemeral_secret_key);

        Ok(Self {
            secret_key,
            public_key,
            remote_public_key: Some(remote_public_key),
            remote_id: Some(remote_id),
            ephemeral_secret_key,
            ephemeral_public_key,
            ephemeral_shared_secret: None,
            remote_ephemeral_public_key: None,
            nonce,
            remote_nonce: None,
            init_msg: None,
            remote_init_msg: None,
            body_size: None,
            egress_aes: None,
            ingress_aes: None,
            egress_mac: None,
            ingress_mac: None,
        })
    }

    /// Creates the recipient side of a connection; the remote identity is
    /// learned from its auth message.
    pub fn new_server(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);
        let nonce = B256::random();
        let ephemeral_secret_key = SecretKey::new(&mut rand::thread_rng());
        let ephemeral_public_key = PublicKey::from_secret_key(SECP256K1, &ephemeral_secret_key);

        Self {
            secret_key,
            public_key,
            remote_public_key: None,
            remote_id: None,
            ephemeral_secret_key,
            ephemeral_public_key,
            ephemeral_shared_secret: None,
            remote_ephemeral_public_key: None,
            nonce,
            remote_nonce: None,
            init_msg: None,
            remote_init_msg: None,
            body_size: None,
            egress_aes: None,
            ingress_aes: None,
            egress_mac: None,
            ingress_mac: None,
        }
    }

    /// The remote peer's identity. Only available once an auth message was
    /// parsed (server) or supplied at construction (client).
    pub fn remote_id(&self) -> PeerId {
        self.remote_id.expect("remote id set on the client and after auth on the server")
    }

    fn encrypt_message(&self, data: &[u8], out: &mut BytesMut) {
        out.reserve(65 + 16 + data.len() + 32);

        let secret_key = SecretKey::new(&mut rand::thread_rng());
        out.extend_from_slice(
            &PublicKey::from_secret_key(SECP256K1, &secret_key).serialize_uncompressed(),
        );

        let x = ecdh_x(
            self.remote_public_key.as_ref().expect("remote public key known when encrypting"),
            &secret_key,
        );
        let mut key = [0u8; 32];
        kdf(x, &[], &mut key);

        let enc_key = B128::from_slice(&key[..16]);
        let mac_key = sha256(&key[16..32]);

        let iv = B128::random();
        let mut encryptor = Ctr64BE::<Aes128>::new_from_slices(enc_key.as_slice(), iv.as_slice())
            .expect("valid key and iv sizes");

        let mut encrypted = data.to_vec();
        encryptor.apply_keystream(&mut encrypted);

        let total_size = u16::try_from(65 + 16 + data.len() + 32).expect("message fits u16");
        let tag = hmac_sha256(
            mac_key.as_slice(),
            &[iv.as_slice(), &encrypted],
            &total_size.to_be_bytes(),
        );

        out.extend_from_slice(iv.as_slice());
        out.extend_from_slice(&encrypted);
        out.extend_from_slice(tag.as_slice());
    }

    fn decrypt_message<'a>(&self, data: &'a mut [u8]) -> Result<&'a mut [u8], ECIESError> {
        // auth-size ‖ pubkey ‖ iv ‖ ciphertext ‖ tag
        if data.len() < 2 + 65 + 16 + 32 {
            return Err(ECIESError::EncryptedDataTooSmall)
        }
        let (auth_data, encrypted) = data.split_at_mut(2);
        let (pubkey_bytes, encrypted) = encrypted.split_at_mut(65);
        let public_key = PublicKey::from_slice(pubkey_bytes)?;
        let (data_iv, tag_bytes) = encrypted.split_at_mut(encrypted.len() - 32);
        let (iv, encrypted_data) = data_iv.split_at_mut(16);
        let tag = B256::from_slice(tag_bytes);

        let x = ecdh_x(&public_key, &self.secret_key);
        let mut key = [0u8; 32];
        kdf(x, &[], &mut key);
        let enc_key = B128::from_slice(&key[..16]);
        let mac_key = sha256(&key[16..32]);

        let check_tag = hmac_sha256(mac_key.as_slice(), &[iv, encrypted_data], auth_data);
        if check_tag != tag {
            return Err(ECIESError::TagCheckDecryptFailed)
        }

        let mut decryptor = Ctr64BE::<Aes128>::new_from_slices(enc_key.as_slice(), iv)
            .expect("valid key and iv sizes");
        decryptor.apply_keystream(encrypted_data);

        Ok(encrypted_data)
    }

    fn create_auth_unencrypted(&self) -> BytesMut {
        // static-shared-secret ^ nonce, signed with the ephemeral key, proves
        // ownership of both the identity key and the ephemeral key
        let x = ecdh_x(
            self.remote_public_key.as_ref().expect("client always knows the remote"),
            &self.secret_key,
        );
        let msg = x ^ self.nonce;
        let (rec_id, sig) = SECP256K1
            .sign_ecdsa_recoverable(
                &Message::from_digest_slice(msg.as_slice()).expect("32 bytes"),
                &self.ephemeral_secret_key,
            )
            .serialize_compact();

        let mut sig_bytes = [0u8; 65];
        sig_bytes[..64].copy_from_slice(&sig);
        sig_bytes[64] = rec_id.to_i32() as u8;

        let id = pk2id(&self.public_key);

        #[derive(RlpEncodable)]
        struct AuthBody<'a> {
            sig: &'a [u8],
            id: &'a [u8],
            nonce: B256,
            protocol_version: u8,
        }

        let mut out = BytesMut::new();
        AuthBody {
            sig: &sig_bytes[..],
            id: id.as_slice(),
            nonce: self.nonce,
            protocol_version: PROTOCOL_VERSION,
        }
        .encode(&mut out);

        // random-length padding defeats packet-size fingerprinting
        out.resize(out.len() + rand::thread_rng().gen_range(100..=300), 0);
        out
    }

    /// Produces the complete auth packet: a two byte size prefix followed by
    /// the ECIES-encrypted auth body.
    pub fn create_auth(&mut self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.write_auth(&mut buf);
        buf
    }

    /// Writes the auth packet into `buf` and records it for the frame MAC
    /// derivation.
    pub fn write_auth(&mut self, buf: &mut BytesMut) {
        let unencrypted = self.create_auth_unencrypted();

        let mut out = buf.split_off(buf.len());
        out.put_u16(0);

        let mut encrypted = out.split_off(out.len());
        self.encrypt_message(&unencrypted, &mut encrypted);

        let len_bytes = u16::try_from(encrypted.len()).expect("auth fits u16").to_be_bytes();
        out[..2].copy_from_slice(&len_bytes);

        out.unsplit(encrypted);
        buf.unsplit(out);

        self.init_msg = Some(Bytes::copy_from_slice(buf));
    }

    fn parse_auth_unencrypted(&mut self, data: &[u8]) -> Result<(), ECIESError> {
        let mut buf = data;
        let header = alloy_rlp::Header::decode(&mut buf)?;
        if !header.list {
            return Err(ECIESError::InvalidAuthData)
        }

        let sig_bytes = Bytes::decode(&mut buf)?;
        if sig_bytes.len() != 65 {
            return Err(ECIESError::InvalidAuthData)
        }
        let signature = RecoverableSignature::from_compact(
            &sig_bytes[..64],
            RecoveryId::from_i32(sig_bytes[64] as i32)?,
        )?;

        let remote_id = PeerId::decode(&mut buf)?;
        let remote_public_key = id2pk(remote_id)?;
        let remote_nonce = B256::decode(&mut buf)?;
        // any remaining fields (version, future extensions) are ignored

        let x = ecdh_x(&remote_public_key, &self.secret_key);
        let msg = x ^ remote_nonce;
        let remote_ephemeral_public_key =
            SECP256K1.recover_ecdsa(&Message::from_digest_slice(msg.as_slice())?, &signature)?;

        self.remote_id = Some(remote_id);
        self.remote_public_key = Some(remote_public_key);
        self.remote_nonce = Some(remote_nonce);
        self.remote_ephemeral_public_key = Some(remote_ephemeral_public_key);
        self.ephemeral_shared_secret =
            Some(ecdh_x(&remote_ephemeral_public_key, &self.ephemeral_secret_key));
        Ok(())
    }

    /// Parses an incoming auth packet (including its size prefix) and learns
    /// the remote identity, nonce and ephemeral key.
    pub fn read_auth(&mut self, data: &mut [u8]) -> Result<(), ECIESError> {
        self.remote_init_msg = Some(Bytes::copy_from_slice(data));
        let unencrypted = self.decrypt_message(data)?;
        self.parse_auth_unencrypted(unencrypted)
    }

    fn create_ack_unencrypted(&self) -> BytesMut {
        #[derive(RlpEncodable)]
        struct AckBody<'a> {
            id: &'a [u8],
            nonce: B256,
            protocol_version: u8,
        }

        let mut out = BytesMut::new();
        AckBody {
            id: pk2id(&self.ephemeral_public_key).as_slice(),
            nonce: self.nonce,
            protocol_version: PROTOCOL_VERSION,
        }
        .encode(&mut out);
        out.resize(out.len() + rand::thread_rng().gen_range(100..=300), 0);
        out
    }

    /// Produces the complete ack packet.
    pub fn create_ack(&mut self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.write_ack(&mut buf);
        buf
    }

    /// Writes the ack packet into `buf` and switches this side into framed
    /// operation.
    pub fn write_ack(&mut self, out: &mut BytesMut) {
        let unencrypted = self.create_ack_unencrypted();

        let mut buf = out.split_off(out.len());
        buf.put_u16(0);

        let mut encrypted = buf.split_off(buf.len());
        self.encrypt_message(&unencrypted, &mut encrypted);

        let len_bytes = u16::try_from(encrypted.len()).expect("ack fits u16").to_be_bytes();
        buf[..2].copy_from_slice(&len_bytes);

        buf.unsplit(encrypted);
        out.unsplit(buf);

        self.init_msg = Some(Bytes::copy_from_slice(out));
        self.setup_frame(true);
    }

    fn parse_ack_unencrypted(&mut self, data: &[u8]) -> Result<(), ECIESError> {
        let mut buf = data;
        let header = alloy_rlp::Header::decode(&mut buf)?;
        if !header.list {
            return Err(ECIESError::InvalidAckData)
        }

        let remote_ephemeral_id = PeerId::decode(&mut buf)?;
        let remote_nonce = B256::decode(&mut buf)?;
        let remote_ephemeral_public_key = id2pk(remote_ephemeral_id)?;

        self.remote_ephemeral_public_key = Some(remote_ephemeral_public_key);
        self.remote_nonce = Some(remote_nonce);
        self.ephemeral_shared_secret =
            Some(ecdh_x(&remote_ephemeral_public_key, &self.ephemeral_secret_key));
        Ok(())
    }

    /// Parses an incoming ack packet and switches this side into framed
    /// operation.
    pub fn read_ack(&mut self, data: &mut [u8]) -> Result<(), ECIESError> {
        self.remote_init_msg = Some(Bytes::copy_from_slice(data));
        let unencrypted = self.decrypt_message(data)?;
        self.parse_ack_unencrypted(unencrypted)?;
        self.setup_frame(false);
        Ok(())
    }

    /// Derives the shared frame-cipher and MAC state from the ephemeral
    /// secret, both nonces and both handshake messages.
    fn setup_frame(&mut self, incoming: bool) {
        let remote_nonce = self.remote_nonce.expect("nonces exchanged");
        let ephemeral_shared_secret =
            self.ephemeral_shared_secret.expect("ephemeral secret derived");

        let mut hasher = Keccak256::new();
        // keccak256(recipient-nonce ‖ initiator-nonce)
        for el in &if incoming { [self.nonce, remote_nonce] } else { [remote_nonce, self.nonce] } {
            hasher.update(el);
        }
        let h_nonce = B256::from_slice(&hasher.finalize());

        let shared_secret: B256 = {
            let mut hasher = Keccak256::new();
            hasher.update(ephemeral_shared_secret.as_slice());
            hasher.update(h_nonce.as_slice());
            B256::from_slice(&hasher.finalize())
        };

        let aes_secret: B256 = {
            let mut hasher = Keccak256::new();
            hasher.update(ephemeral_shared_secret.as_slice());
            hasher.update(shared_secret.as_slice());
            B256::from_slice(&hasher.finalize())
        };

        let iv = B128::default();
        self.ingress_aes = Some(
            Ctr64BE::<Aes256>::new_from_slices(aes_secret.as_slice(), iv.as_slice())
                .expect("valid key and iv sizes"),
        );
        self.egress_aes = Some(
            Ctr64BE::<Aes256>::new_from_slices(aes_secret.as_slice(), iv.as_slice())
                .expect("valid key and iv sizes"),
        );

        let mac_secret: B256 = {
            let mut hasher = Keccak256::new();
            hasher.update(ephemeral_shared_secret.as_slice());
            hasher.update(aes_secret.as_slice());
            B256::from_slice(&hasher.finalize())
        };

        let init_msg = self.init_msg.take().expect("own handshake message recorded");
        let remote_init_msg =
            self.remote_init_msg.take().expect("remote handshake message recorded");

        let mut egress_mac = MAC::new(mac_secret);
        egress_mac.update((mac_secret ^ remote_nonce).as_slice());
        egress_mac.update(&init_msg);
        self.egress_mac = Some(egress_mac);

        let mut ingress_mac = MAC::new(mac_secret);
        ingress_mac.update((mac_secret ^ self.nonce).as_slice());
        ingress_mac.update(&remote_init_msg);
        self.ingress_mac = Some(ingress_mac);
    }

    /// Writes an encrypted+MAC'd frame header declaring a body of `size`
    /// bytes.
    pub fn write_header(&mut self, out: &mut BytesMut, size: usize) {
        // 3 byte big-endian length, then the static rlp [capability-id, context-id]
        let mut header = [0u8; 16];
        header[..3].copy_from_slice(&(size as u32).to_be_bytes()[1..]);
        header[3..6].copy_from_slice(&[0xc2, 0x80, 0x80]);

        let mut header: HeaderBytes = header.into();
        self.egress_aes.as_mut().expect("frame established").apply_keystream(&mut header);
        self.egress_mac.as_mut().expect("frame established").update_header(&header);
        let tag = self.egress_mac.as_ref().expect("frame established").digest();

        out.reserve(Self::header_len());
        out.extend_from_slice(&header);
        out.extend_from_slice(tag.as_slice());
    }

    /// Validates and decrypts a 32-byte frame header, returning the body
    /// size it declares.
    pub fn read_header(&mut self, data: &mut [u8]) -> Result<usize, ECIESError> {
        let (header_bytes, mac_bytes) = data.split_at_mut(16);
        let header: &mut HeaderBytes = HeaderBytes::from_mut_slice(header_bytes);
        let mac = B128::from_slice(&mac_bytes[..16]);

        self.ingress_mac.as_mut().expect("frame established").update_header(header);
        let check_mac = self.ingress_mac.as_ref().expect("frame established").digest();
        if check_mac != mac {
            return Err(ECIESError::TagCheckHeaderFailed)
        }

        self.ingress_aes.as_mut().expect("frame established").apply_keystream(header);
        let body_size = ((header[0] as usize) << 16) + ((header[1] as usize) << 8) +
            (header[2] as usize);
        if body_size == 0 {
            return Err(ECIESError::ZeroBodySize)
        }
        self.body_size = Some(body_size);
        Ok(body_size)
    }

    /// The on-wire length of a frame header.
    pub const fn header_len() -> usize {
        32
    }

    /// The on-wire length of the pending frame body: padded to 16 bytes plus
    /// the body MAC.
    pub fn body_len(&self) -> usize {
        let len = self.body_size.expect("header read before body");
        (if len % 16 == 0 { len } else { (len / 16 + 1) * 16 }) + 16
    }

    /// Writes the padded, encrypted and MAC'd frame body for `data`.
    pub fn write_body(&mut self, out: &mut BytesMut, data: &[u8]) {
        let len = if data.len() % 16 == 0 { data.len() } else { (data.len() / 16 + 1) * 16 };
        let old_len = out.len();
        out.resize(old_len + len, 0);

        let encrypted = &mut out[old_len..old_len + len];
        encrypted[..data.len()].copy_from_slice(data);

        self.egress_aes.as_mut().expect("frame established").apply_keystream(encrypted);
        self.egress_mac.as_mut().expect("frame established").update_body(encrypted);
        let tag = self.egress_mac.as_ref().expect("frame established").digest();

        out.extend_from_slice(tag.as_slice());
    }

    /// Validates and decrypts a frame body read off the wire, returning the
    /// unpadded payload.
    pub fn read_body<'a>(&mut self, data: &'a mut [u8]) -> Result<&'a mut [u8], ECIESError> {
        let (body, mac_bytes) = data.split_at_mut(data.len() - 16);
        let mac = B128::from_slice(mac_bytes);
        self.ingress_mac.as_mut().expect("frame established").update_body(body);
        let check_mac = self.ingress_mac.as_ref().expect("frame established").digest();
        if check_mac != mac {
            return Err(ECIESError::TagCheckBodyFailed)
        }

        let size = self.body_size.take().expect("header read before body");
        self.ingress_aes.as_mut().expect("frame established").apply_keystream(body);
        Ok(&mut body[..size])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake_pair() -> (ECIES, ECIES) {
        let client_key = SecretKey::new(&mut rand::thread_rng());
        let server_key = SecretKey::new(&mut rand::thread_rng());
        let server_id = pk2id(&PublicKey::from_secret_key(SECP256K1, &server_key));

        let mut client = ECIES::new_client(client_key, server_id).unwrap();
        let mut server = ECIES::new_server(server_key);

        let mut auth = client.create_auth();
        server.read_auth(&mut auth).unwrap();

        let mut ack = server.create_ack();
        client.read_ack(&mut ack).unwrap();

        (client, server)
    }

    #[test]
    fn ecdh_is_symmetric() {
        let a = SecretKey::new(&mut rand::thread_rng());
        let b = SecretKey::new(&mut rand::thread_rng());
        let pa = PublicKey::from_secret_key(SECP256K1, &a);
        let pb = PublicKey::from_secret_key(SECP256K1, &b);
        assert_eq!(ecdh_x(&pb, &a), ecdh_x(&pa, &b));
    }

    #[test]
    fn auth_reveals_remote_identity() {
        let client_key = SecretKey::new(&mut rand::thread_rng());
        let server_key = SecretKey::new(&mut rand::thread_rng());
        let client_id = pk2id(&PublicKey::from_secret_key(SECP256K1, &client_key));
        let server_id = pk2id(&PublicKey::from_secret_key(SECP256K1, &server_key));

        let mut client = ECIES::new_client(client_key, server_id).unwrap();
        let mut server = ECIES::new_server(server_key);

        let mut auth = client.create_auth();
        server.read_auth(&mut auth).unwrap();
        assert_eq!(server.remote_id(), client_id);
    }

    #[test]
    fn frames_decrypt_byte_for_byte() {
        let (mut client, mut server) = handshake_pair();

        let marker = b"hello from the light side";
        let mut frame = BytesMut::new();
        client.write_header(&mut frame, marker.len());
        client.write_body(&mut frame, marker);

        let mut header = frame.split_to(ECIES::header_len());
        let body_size = server.read_header(&mut header).unwrap();
        assert_eq!(body_size, marker.len());

        let mut body = frame.split_to(server.body_len());
        let decrypted = server.read_body(&mut body).unwrap();
        assert_eq!(decrypted, marker);

        // and the reverse direction
        let mut frame = BytesMut::new();
        server.write_header(&mut frame, marker.len());
        server.write_body(&mut frame, marker);
        let mut header = frame.split_to(ECIES::header_len());
        client.read_header(&mut header).unwrap();
        let mut body = frame.split_to(client.body_len());
        assert_eq!(client.read_body(&mut body).unwrap(), marker);
    }

    #[test]
    fn tampered_header_fails_mac() {
        let (mut client, mut server) = handshake_pair();

        let mut frame = BytesMut::new();
        client.write_header(&mut frame, 16);
        frame[0] ^= 0x01;
        let mut header = frame.split_to(ECIES::header_len());
        assert!(matches!(
            server.read_header(&mut header),
            Err(ECIESError::TagCheckHeaderFailed)
        ));
    }

    #[test]
    fn tampered_auth_fails() {
        let client_key = SecretKey::new(&mut rand::thread_rng());
        let server_key = SecretKey::new(&mut rand::thread_rng());
        let server_id = pk2id(&PublicKey::from_secret_key(SECP256K1, &server_key));

        let mut client = ECIES::new_client(client_key, server_id).unwrap();
        let mut server = ECIES::new_server(server_key);

        let mut auth = client.create_auth();
        let last = auth.len() - 1;
        auth[last] ^= 0xff;
        assert!(server.read_auth(&mut auth).is_err());
    }
}
