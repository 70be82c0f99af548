//! Signature primitives the validators treat as black boxes.
//!
//! - secp256k1 recoverable ECDSA for the primary credential and scoped
//!   delegates (`recover_signer`).
//! - P-256 WebAuthn assertions for second factors (`verify_webauthn`).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use k256::ecdsa::{
    RecoveryId, Signature as K256Signature, SigningKey as K256SigningKey,
    VerifyingKey as K256VerifyingKey,
};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{
    Signature as P256Signature, SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::{Digest, Keccak256};

use crate::account::types::{Address, H256};
use crate::encoding::CanonicalEncode;

/// Length of a recoverable signature: r(32) || s(32) || v(1).
pub const SIGNATURE_LEN: usize = 65;

/// rpIdHash(32) || flags(1) || signCount(4)
pub const AUTH_DATA_MIN_LEN: usize = 37;

const FLAG_USER_PRESENT: u8 = 0x01;
const FLAG_USER_VERIFIED: u8 = 0x04;
const WEBAUTHN_GET_TYPE: &[u8] = b"\"type\":\"webauthn.get\"";

pub fn keccak256(data: &[u8]) -> H256 {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    H256(out)
}

/// Recover the signer of `hash`. Returns `None` for malformed, high-s or
/// otherwise unrecoverable signatures.
pub fn recover_signer(hash: &H256, signature: &[u8; SIGNATURE_LEN]) -> Option<Address> {
    let sig = K256Signature::from_slice(&signature[..64]).ok()?;
    if sig.normalize_s().is_some() {
        return None;
    }
    let v = match signature[64] {
        27 | 28 => signature[64] - 27,
        0 | 1 => signature[64],
        _ => return None,
    };
    let recovery_id = RecoveryId::from_byte(v)?;
    let key = K256VerifyingKey::recover_from_prehash(&hash.0, &sig, recovery_id).ok()?;
    Some(address_of(&key))
}

/// Ethereum-style address of a secp256k1 public key.
pub fn address_of(key: &K256VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest.0[12..]);
    Address(out)
}

/// Affine coordinates of a P-256 second-factor key.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PasskeyPublicKey {
    pub x: H256,
    pub y: H256,
}

impl PasskeyPublicKey {
    pub fn new(x: [u8; 32], y: [u8; 32]) -> Self {
        Self { x: H256(x), y: H256(y) }
    }

    /// Stable credential identity: `keccak256(x || y)`.
    pub fn id(&self) -> H256 {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&self.x.0);
        buf[32..].copy_from_slice(&self.y.0);
        keccak256(&buf)
    }

    pub fn is_zero(&self) -> bool {
        self.x.is_zero() && self.y.is_zero()
    }

    /// `None` when the coordinates are not a point on the curve.
    pub fn verifying_key(&self) -> Option<P256VerifyingKey> {
        let point = p256::EncodedPoint::from_affine_coordinates(
            p256::FieldBytes::from_slice(&self.x.0),
            p256::FieldBytes::from_slice(&self.y.0),
            false,
        );
        P256VerifyingKey::from_encoded_point(&point).ok()
    }
}

impl CanonicalEncode for PasskeyPublicKey {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.x.encode_into(out);
        self.y.encode_into(out);
    }
}

/// A WebAuthn `get` assertion as carried in a dual-factor credential blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebAuthnAssertion {
    pub authenticator_data: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub challenge_index: usize,
    pub type_index: usize,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl WebAuthnAssertion {
    pub fn user_verified(&self) -> bool {
        self.authenticator_data
            .get(32)
            .is_some_and(|flags| flags & FLAG_USER_VERIFIED != 0)
    }
}

/// Verify that `assertion` is a P-256 signature by `key` whose client data
/// carries exactly `challenge` (base64url, no padding).
pub fn verify_webauthn(
    challenge: &[u8],
    assertion: &WebAuthnAssertion,
    key: &PasskeyPublicKey,
) -> bool {
    let auth_data = &assertion.authenticator_data;
    if auth_data.len() < AUTH_DATA_MIN_LEN || auth_data[32] & FLAG_USER_PRESENT == 0 {
        return false;
    }

    let client = &assertion.client_data_json;
    if !starts_at(client, assertion.type_index, WEBAUTHN_GET_TYPE) {
        return false;
    }
    let expected = format!("\"challenge\":\"{}\"", URL_SAFE_NO_PAD.encode(challenge));
    if !starts_at(client, assertion.challenge_index, expected.as_bytes()) {
        return false;
    }

    let Some(verifying_key) = key.verifying_key() else {
        return false;
    };
    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&assertion.r);
    rs[32..].copy_from_slice(&assertion.s);
    let Ok(signature) = P256Signature::from_slice(&rs) else {
        return false;
    };
    // Malleable high-s form is rejected.
    if signature.normalize_s().is_some() {
        return false;
    }

    // SHA-256 over the signed data is applied by the verifier.
    let mut signed = Vec::with_capacity(auth_data.len() + 32);
    signed.extend_from_slice(auth_data);
    signed.extend_from_slice(&Sha256::digest(client));
    verifying_key.verify(&signed, &signature).is_ok()
}

fn starts_at(haystack: &[u8], index: usize, needle: &[u8]) -> bool {
    haystack
        .get(index..)
        .is_some_and(|rest| rest.starts_with(needle))
}

/// secp256k1 signing key for primary identities, guardians and delegates.
pub struct KeyPair {
    pub signing_key: K256SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing_key: K256SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_secret_hex(secret: &str) -> Result<Self, String> {
        let bytes = hex::decode(secret.strip_prefix("0x").unwrap_or(secret))
            .map_err(|e| format!("invalid secret hex: {}", e))?;
        let signing_key = K256SigningKey::from_slice(&bytes).map_err(|e| e.to_string())?;
        Ok(Self { signing_key })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn address(&self) -> Address {
        address_of(self.signing_key.verifying_key())
    }

    /// Recoverable signature over a 32-byte digest, `v` in {27, 28}.
    pub fn sign_hash(&self, hash: &H256) -> Result<[u8; SIGNATURE_LEN], String> {
        let (sig, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&hash.0)
            .map_err(|e| e.to_string())?;
        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recovery_id.to_byte() + 27;
        Ok(out)
    }
}

/// P-256 key acting as a device-bound second factor.
pub struct PasskeyPair {
    pub signing_key: P256SigningKey,
}

impl PasskeyPair {
    pub fn generate() -> Self {
        Self {
            signing_key: P256SigningKey::random(&mut OsRng),
        }
    }

    pub fn public_key(&self) -> PasskeyPublicKey {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        if let (Some(px), Some(py)) = (point.x(), point.y()) {
            x.copy_from_slice(px);
            y.copy_from_slice(py);
        }
        PasskeyPublicKey::new(x, y)
    }

    /// Produce an assertion over `challenge` the way a platform authenticator
    /// would: user present and verified, origin-bound client data.
    pub fn assert(&self, challenge: &[u8], origin: &str) -> WebAuthnAssertion {
        let mut authenticator_data = keccak256(origin.as_bytes()).0.to_vec();
        authenticator_data.push(FLAG_USER_PRESENT | FLAG_USER_VERIFIED);
        authenticator_data.extend_from_slice(&0u32.to_be_bytes());

        let client_data_json = format!(
            "{{\"type\":\"webauthn.get\",\"challenge\":\"{}\",\"origin\":\"{}\",\"crossOrigin\":false}}",
            URL_SAFE_NO_PAD.encode(challenge),
            origin
        )
        .into_bytes();

        let mut signed = authenticator_data.clone();
        signed.extend_from_slice(&Sha256::digest(&client_data_json));
        let sig: P256Signature = self.signing_key.sign(&signed);
        let sig = sig.normalize_s().unwrap_or(sig);
        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);

        WebAuthnAssertion {
            authenticator_data,
            // Fixed layout above: type first, challenge second.
            type_index: 1,
            challenge_index: 1 + WEBAUTHN_GET_TYPE.len() + 1,
            client_data_json,
            r,
            s,
        }
    }
}
