//! Counterfactual parameters read from the deployment payload.
//!
//! The payload is produced by the external deployer and mirrors an
//! ABI-encoded factory call. Only the fields below are read; everything else
//! (selector, padding, salt) is ignored.
//!
//! | offset | len | field                          |
//! |--------|-----|--------------------------------|
//! | 16     | 20  | initial primary identity       |
//! | 36     | 32  | second-factor key x            |
//! | 68     | 32  | second-factor key y            |
//! | 131    | 1   | dual-factor enforcement flag   |
//!
//! An all-zero key means "no second factor".

use serde::{Deserialize, Serialize};

use crate::account::types::{Address, H256};
use crate::crypto::PasskeyPublicKey;
use crate::error::{Result, ValidationFailure};

pub const PRIMARY_OFFSET: usize = 16;
pub const KEY_X_OFFSET: usize = 36;
pub const KEY_Y_OFFSET: usize = 68;
pub const ENFORCEMENT_OFFSET: usize = 131;
pub const SALT_OFFSET: usize = 132;
pub const INIT_PAYLOAD_LEN: usize = 164;

/// Selector written by [`InitParams::encode`]; accounts never check it.
pub const CREATE_ACCOUNT_SELECTOR: [u8; 4] = [0x5f, 0xbf, 0xb9, 0xcf];

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InitParams {
    pub primary: Address,
    pub second_factor: Option<PasskeyPublicKey>,
    pub dual_factor: bool,
}

impl InitParams {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < INIT_PAYLOAD_LEN {
            return Err(malformed(format!(
                "expected at least {} bytes, got {}",
                INIT_PAYLOAD_LEN,
                payload.len()
            )));
        }

        let primary = Address::from_slice(&payload[PRIMARY_OFFSET..PRIMARY_OFFSET + 20])
            .ok_or_else(|| malformed("primary identity".into()))?;
        if primary.is_zero() {
            return Err(malformed("primary identity is zero".into()));
        }

        let x = H256::from_slice(&payload[KEY_X_OFFSET..KEY_X_OFFSET + 32])
            .ok_or_else(|| malformed("second factor x".into()))?;
        let y = H256::from_slice(&payload[KEY_Y_OFFSET..KEY_Y_OFFSET + 32])
            .ok_or_else(|| malformed("second factor y".into()))?;
        let key = PasskeyPublicKey { x, y };
        let second_factor = if key.is_zero() {
            None
        } else {
            if key.verifying_key().is_none() {
                return Err(malformed("second factor is not a P-256 point".into()));
            }
            Some(key)
        };

        let dual_factor = match payload[ENFORCEMENT_OFFSET] {
            0 => false,
            1 => true,
            other => return Err(malformed(format!("enforcement flag {}", other))),
        };
        if dual_factor && second_factor.is_none() {
            return Err(malformed("enforcement requested without a second factor".into()));
        }

        Ok(Self {
            primary,
            second_factor,
            dual_factor,
        })
    }

    /// Build the payload the deployer would hand to the account.
    pub fn encode(&self, salt: H256) -> Vec<u8> {
        let mut payload = vec![0u8; INIT_PAYLOAD_LEN];
        payload[..4].copy_from_slice(&CREATE_ACCOUNT_SELECTOR);
        payload[PRIMARY_OFFSET..PRIMARY_OFFSET + 20].copy_from_slice(&self.primary.0);
        if let Some(key) = &self.second_factor {
            payload[KEY_X_OFFSET..KEY_X_OFFSET + 32].copy_from_slice(&key.x.0);
            payload[KEY_Y_OFFSET..KEY_Y_OFFSET + 32].copy_from_slice(&key.y.0);
        }
        payload[ENFORCEMENT_OFFSET] = u8::from(self.dual_factor);
        payload[SALT_OFFSET..SALT_OFFSET + 32].copy_from_slice(&salt.0);
        payload
    }

    /// Credential id of the payload's second factor, if any.
    pub fn second_factor_id(&self) -> Option<H256> {
        self.second_factor.as_ref().map(PasskeyPublicKey::id)
    }
}

fn malformed(reason: String) -> crate::error::AccountError {
    ValidationFailure::MalformedInitPayload(reason).into()
}
