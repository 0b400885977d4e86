//! Cryptographic primitives for talkgroup.
//!
//! Provides three things:
//!   1. BLAKE3 hashing — group hashes, key derivation, license MACs
//!   2. Group payload sealing — ChaCha20-Poly1305 via snow's cipher resolver
//!   3. Node identity — random 8-byte node ids and their hex form
//!
//! Derived key material is held in `Zeroizing` buffers and wiped on drop.

use rand::RngCore;
use snow::params::CipherChoice;
use snow::resolvers::{CryptoResolver, DefaultResolver};
use snow::types::Cipher;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::wire::{Frame, NodeId, FLAG_SEALED, MAX_PAYLOAD};

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

const GROUP_KEY_CONTEXT: &str = "talkgroup group payload v1";

/// Derive a group's payload key from its password.
///
/// Every member configured with the same password derives the same key.
pub fn derive_group_key(password: &str) -> Zeroizing<[u8; 32]> {
    Zeroizing::new(blake3::derive_key(GROUP_KEY_CONTEXT, password.as_bytes()))
}

/// License MAC: the first 16 bytes of BLAKE3(entitlement ‖ expiry_be).
pub fn license_mac(entitlement: &str, expiry: u64) -> [u8; 16] {
    let mut h = blake3::Hasher::new();
    h.update(entitlement.as_bytes());
    h.update(&expiry.to_be_bytes());
    let digest = h.finalize();
    let mut mac = [0u8; 16];
    mac.copy_from_slice(&digest.as_bytes()[..16]);
    mac
}

/// Activation code for a license key: hex of the first 8 bytes of BLAKE3(key).
pub fn activation_code(license_key: &str) -> String {
    hex::encode(&hash(license_key.as_bytes())[..8])
}

// ── Group cipher ──────────────────────────────────────────────────────────────

/// Poly1305 tag appended to every sealed payload.
pub const TAG_LEN: usize = 16;

/// Seals and opens frame payloads for one encrypted group.
///
/// The frame header, with `length` set to the sealed length, is the
/// associated data, so tampering with any header field fails the open.
pub struct GroupCipher {
    cipher: Box<dyn Cipher>,
}

impl std::fmt::Debug for GroupCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupCipher")
            .field("cipher", &self.cipher.name())
            .finish()
    }
}

impl GroupCipher {
    pub fn new(password: &str) -> Result<Self, CryptoError> {
        let mut cipher = DefaultResolver
            .resolve_cipher(&CipherChoice::ChaChaPoly)
            .ok_or(CryptoError::CipherUnavailable)?;
        let key = derive_group_key(password);
        cipher.set(&*key);
        Ok(Self { cipher })
    }

    /// Encrypt `frame.payload` in place and mark the frame sealed.
    pub fn seal(&self, frame: &mut Frame) -> Result<(), CryptoError> {
        if frame.is_sealed() {
            return Err(CryptoError::AlreadySealed);
        }
        let sealed_len = frame.payload.len() + TAG_LEN;
        if sealed_len > MAX_PAYLOAD {
            return Err(CryptoError::PayloadTooLarge(sealed_len));
        }

        frame.flags |= FLAG_SEALED;
        frame.nonce = rand::thread_rng().next_u64();

        let mut header = frame.header();
        header.length.set(sealed_len as u32);

        let mut out = vec![0u8; sealed_len];
        let written = self.cipher.encrypt(
            frame.nonce,
            zerocopy::AsBytes::as_bytes(&header),
            &frame.payload,
            &mut out,
        );
        out.truncate(written);
        frame.payload = out;
        Ok(())
    }

    /// Decrypt a sealed frame in place and clear its sealed flag.
    pub fn open(&self, frame: &mut Frame) -> Result<(), CryptoError> {
        if !frame.is_sealed() {
            return Err(CryptoError::NotSealed);
        }
        if frame.payload.len() < TAG_LEN {
            return Err(CryptoError::OpenFailed);
        }

        let header = frame.header();
        let mut out = vec![0u8; frame.payload.len() - TAG_LEN];
        let written = self
            .cipher
            .decrypt(
                frame.nonce,
                zerocopy::AsBytes::as_bytes(&header),
                &frame.payload,
                &mut out,
            )
            .map_err(|_| CryptoError::OpenFailed)?;
        out.truncate(written);

        frame.payload = out;
        frame.flags &= !FLAG_SEALED;
        frame.nonce = 0;
        Ok(())
    }
}

// ── Node identity ─────────────────────────────────────────────────────────────

/// Generate a random node id.
pub fn generate_node_id() -> NodeId {
    let mut id = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut id);
    id
}

/// Parse a 16-char hex node id.
pub fn parse_node_id(s: &str) -> Result<NodeId, CryptoError> {
    let bytes = hex::decode(s).map_err(|_| CryptoError::BadNodeId(s.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::BadNodeId(s.to_string()))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("cipher not available from resolver")]
    CipherUnavailable,
    #[error("frame is already sealed")]
    AlreadySealed,
    #[error("frame is not sealed")]
    NotSealed,
    #[error("sealed payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),
    #[error("payload failed authentication")]
    OpenFailed,
    #[error("invalid node id: {0:?}")]
    BadNodeId(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
