//! Bit-exact credential blob codecs
//!
//! Routed blob: `validator(20) || inner`. The inner format belongs to the
//! validator:
//!
//! - single factor: `signature(65)`
//! - dual factor: `authDataLen(2, BE) || authenticatorData || clientContext ||
//!   challengeIndex(2) || typeIndex(2) || r(32) || s(32) || secondFactorId(32)
//!   || primarySignature(65)`
//! - scoped delegation: `delegateKey(20) || signature(65)`

use crate::account::types::{Address, H256};
use crate::crypto::{WebAuthnAssertion, AUTH_DATA_MIN_LEN, SIGNATURE_LEN};
use crate::error::{AccountError, Result, ValidationFailure};

pub const VALIDATOR_PREFIX_LEN: usize = 20;

/// challengeIndex + typeIndex + r + s + secondFactorId + primarySignature
const DUAL_FACTOR_TAIL_LEN: usize = 2 + 2 + 32 + 32 + 32 + SIGNATURE_LEN;

pub const DUAL_FACTOR_MIN_LEN: usize = 2 + AUTH_DATA_MIN_LEN + DUAL_FACTOR_TAIL_LEN;

pub const SCOPED_LEN: usize = 20 + SIGNATURE_LEN;

/// The closed set of credential formats the account understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    SingleFactor([u8; SIGNATURE_LEN]),
    DualFactor(Box<DualFactorCredential>),
    Scoped(ScopedCredential),
}

impl Credential {
    /// Decode an MFA validator blob; the length decides the format.
    pub fn decode_mfa(inner: &[u8]) -> Result<Self> {
        if inner.len() == SIGNATURE_LEN {
            decode_single_factor(inner).map(Credential::SingleFactor)
        } else {
            DualFactorCredential::decode(inner).map(|c| Credential::DualFactor(Box::new(c)))
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Credential::SingleFactor(sig) => Ok(sig.to_vec()),
            Credential::DualFactor(dual) => dual.encode(),
            Credential::Scoped(scoped) => Ok(scoped.encode()),
        }
    }
}

/// Split `validator(20) || inner`.
pub fn split_validator_prefix(blob: &[u8]) -> Result<(Address, &[u8])> {
    if blob.len() < VALIDATOR_PREFIX_LEN {
        return Err(malformed(format!(
            "blob of {} bytes has no validator prefix",
            blob.len()
        )));
    }
    let (prefix, inner) = blob.split_at(VALIDATOR_PREFIX_LEN);
    let validator =
        Address::from_slice(prefix).ok_or_else(|| malformed("validator prefix".into()))?;
    Ok((validator, inner))
}

pub fn with_validator_prefix(validator: Address, inner: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(VALIDATOR_PREFIX_LEN + inner.len());
    blob.extend_from_slice(&validator.0);
    blob.extend_from_slice(inner);
    blob
}

pub fn decode_single_factor(inner: &[u8]) -> Result<[u8; SIGNATURE_LEN]> {
    <[u8; SIGNATURE_LEN]>::try_from(inner).map_err(|_| {
        malformed(format!(
            "single-factor credential must be {} bytes, got {}",
            SIGNATURE_LEN,
            inner.len()
        ))
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DualFactorCredential {
    pub assertion: WebAuthnAssertion,
    pub second_factor_id: H256,
    pub primary_signature: [u8; SIGNATURE_LEN],
}

impl DualFactorCredential {
    pub fn decode(inner: &[u8]) -> Result<Self> {
        if inner.len() < DUAL_FACTOR_MIN_LEN {
            return Err(malformed(format!(
                "dual-factor credential needs at least {} bytes, got {}",
                DUAL_FACTOR_MIN_LEN,
                inner.len()
            )));
        }

        let auth_len = u16::from_be_bytes([inner[0], inner[1]]) as usize;
        if auth_len < AUTH_DATA_MIN_LEN {
            return Err(malformed(format!("authenticator data of {} bytes", auth_len)));
        }
        let client_start = 2 + auth_len;
        let tail_start = inner.len() - DUAL_FACTOR_TAIL_LEN;
        if client_start > tail_start {
            return Err(malformed("authenticator data overruns the blob".into()));
        }

        let authenticator_data = inner[2..client_start].to_vec();
        let client_data_json = inner[client_start..tail_start].to_vec();

        let mut cursor = Cursor::new(&inner[tail_start..]);
        let challenge_index = cursor.u16()? as usize;
        let type_index = cursor.u16()? as usize;
        let r = cursor.array::<32>()?;
        let s = cursor.array::<32>()?;
        let second_factor_id = H256(cursor.array::<32>()?);
        let primary_signature = cursor.array::<SIGNATURE_LEN>()?;

        if challenge_index >= client_data_json.len() || type_index >= client_data_json.len() {
            return Err(malformed("client context index out of range".into()));
        }

        Ok(Self {
            assertion: WebAuthnAssertion {
                authenticator_data,
                client_data_json,
                challenge_index,
                type_index,
                r,
                s,
            },
            second_factor_id,
            primary_signature,
        })
    }

    /// Fails when a length or index does not fit its two-byte field.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let a = &self.assertion;
        let mut out = Vec::with_capacity(
            2 + a.authenticator_data.len() + a.client_data_json.len() + DUAL_FACTOR_TAIL_LEN,
        );
        out.extend_from_slice(&u16_field(a.authenticator_data.len(), "authenticator data length")?);
        out.extend_from_slice(&a.authenticator_data);
        out.extend_from_slice(&a.client_data_json);
        out.extend_from_slice(&u16_field(a.challenge_index, "challenge index")?);
        out.extend_from_slice(&u16_field(a.type_index, "type index")?);
        out.extend_from_slice(&a.r);
        out.extend_from_slice(&a.s);
        out.extend_from_slice(&self.second_factor_id.0);
        out.extend_from_slice(&self.primary_signature);
        Ok(out)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopedCredential {
    pub delegate: Address,
    pub signature: [u8; SIGNATURE_LEN],
}

impl ScopedCredential {
    pub fn decode(inner: &[u8]) -> Result<Self> {
        if inner.len() != SCOPED_LEN {
            return Err(malformed(format!(
                "scoped credential must be {} bytes, got {}",
                SCOPED_LEN,
                inner.len()
            )));
        }
        let mut cursor = Cursor::new(inner);
        let delegate = Address(cursor.array::<20>()?);
        let signature = cursor.array::<SIGNATURE_LEN>()?;
        Ok(Self { delegate, signature })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SCOPED_LEN);
        out.extend_from_slice(&self.delegate.0);
        out.extend_from_slice(&self.signature);
        out
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| malformed("truncated credential".into()))?;
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let b = self.take(N)?;
        <[u8; N]>::try_from(b).map_err(|_| malformed("truncated credential".into()))
    }
}

fn malformed(reason: String) -> AccountError {
    ValidationFailure::MalformedCredential(reason).into()
}

fn u16_field(value: usize, field: &str) -> Result<[u8; 2]> {
    u16::try_from(value)
        .map(u16::to_be_bytes)
        .map_err(|_| malformed(format!("{} {} does not fit in two bytes", field, value)))
}
