//! MFA validator: primary ECDSA credential plus an optional WebAuthn second
//! factor.
//!
//! The mode comes from the account, never from the caller. Once the account
//! is instantiated the registry is the only source of credentials; before
//! that, and only then, the deployment payload is consulted.

use tracing::debug;

use super::credential::{decode_single_factor, DualFactorCredential};
use super::deploy::InitParams;
use super::store::CredentialRegistry;
use super::types::{Address, H256};
use crate::crypto::{recover_signer, verify_webauthn, PasskeyPublicKey, SIGNATURE_LEN};
use crate::error::{Result, ValidationFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaMode {
    SingleFactor,
    DualFactor,
}

/// Where the validator reads the primary identity and second factors from.
#[derive(Debug, Clone, Copy)]
pub enum CredentialSource<'a> {
    Stored(&'a CredentialRegistry),
    /// Not yet instantiated: read from the deployment payload.
    Counterfactual(&'a InitParams),
}

impl<'a> CredentialSource<'a> {
    pub fn mode(&self) -> MfaMode {
        let enforced = match self {
            CredentialSource::Stored(registry) => registry.dual_factor_enabled(),
            CredentialSource::Counterfactual(params) => params.dual_factor,
        };
        if enforced {
            MfaMode::DualFactor
        } else {
            MfaMode::SingleFactor
        }
    }

    fn primary(&self) -> Option<Address> {
        match self {
            CredentialSource::Stored(registry) => registry.primary(),
            CredentialSource::Counterfactual(params) => Some(params.primary),
        }
    }

    /// Resolve an active second factor by its id.
    fn second_factor(&self, id: &H256) -> Option<PasskeyPublicKey> {
        match self {
            CredentialSource::Stored(registry) => {
                registry.active_credential(id).map(|c| c.public_key)
            }
            // Only the payload key exists before instantiation; the caller
            // must still name it.
            CredentialSource::Counterfactual(params) => params
                .second_factor
                .filter(|key| key.id() == *id),
        }
    }
}

/// Validate an MFA credential (validator prefix already stripped) against
/// `action_hash`. Returns the primary identity on success.
pub fn validate(source: CredentialSource<'_>, inner: &[u8], action_hash: &H256) -> Result<Address> {
    let primary = source
        .primary()
        .ok_or(ValidationFailure::NotDeployed)?;

    let primary_signature = match source.mode() {
        MfaMode::SingleFactor => decode_single_factor(inner)?,
        MfaMode::DualFactor => {
            if inner.len() == SIGNATURE_LEN {
                return Err(ValidationFailure::MalformedCredential(
                    "dual-factor enforcement requires a second-factor assertion".into(),
                )
                .into());
            }
            let dual = DualFactorCredential::decode(inner)?;
            verify_second_factor(&source, &dual, action_hash)?;
            dual.primary_signature
        }
    };

    if recover_signer(action_hash, &primary_signature) != Some(primary) {
        return Err(ValidationFailure::PrimarySignatureMismatch.into());
    }
    debug!(%primary, mode = ?source.mode(), "mfa credential accepted");
    Ok(primary)
}

fn verify_second_factor(
    source: &CredentialSource<'_>,
    dual: &DualFactorCredential,
    action_hash: &H256,
) -> Result<()> {
    let key = source
        .second_factor(&dual.second_factor_id)
        .ok_or(ValidationFailure::UnknownSecondFactor(dual.second_factor_id))?;
    // The challenge is the action hash itself, byte for byte.
    if !verify_webauthn(&action_hash.0, &dual.assertion, &key) {
        return Err(ValidationFailure::SecondFactorMismatch.into());
    }
    Ok(())
}
