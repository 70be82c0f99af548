//! Per-account credential registry
//!
//! Holds the primary identity, the registered second factors and the
//! scoped-delegation grants. Second factors are never deleted: deactivation
//! keeps the entry so an identity hash can never be silently reused.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::deploy::InitParams;
use super::session::ScopedGrant;
use super::types::{Address, Timestamp, H256};
use crate::crypto::PasskeyPublicKey;
use crate::error::{AuthorizationError, InvariantViolation, Result};

/// Registry layout version. Version 2 is the multi-credential layout; older
/// single-key accounts migrate by adding a credential and then enabling
/// enforcement, never by reinterpreting stored data.
pub const REGISTRY_VERSION: u16 = 2;

/// A registered second-factor key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub public_key: PasskeyPublicKey,
    pub added_at: Timestamp,
    pub active: bool,
    pub tag: String,
}

impl Credential {
    pub fn id(&self) -> H256 {
        self.public_key.id()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CredentialRegistry {
    version: u16,
    primary: Option<Address>,
    credentials: HashMap<H256, Credential>,
    dual_factor: bool,
    grants: HashMap<Address, ScopedGrant>,
}

impl CredentialRegistry {
    /// Populate a fresh registry from deployment parameters.
    pub fn from_init(params: &InitParams, now: Timestamp) -> Self {
        let mut registry = Self {
            version: REGISTRY_VERSION,
            primary: Some(params.primary),
            ..Self::default()
        };
        if let Some(key) = params.second_factor {
            registry.credentials.insert(
                key.id(),
                Credential {
                    public_key: key,
                    added_at: now,
                    active: true,
                    tag: "initial".to_string(),
                },
            );
        }
        registry.dual_factor = params.dual_factor && registry.active_count() > 0;
        registry
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    /// Empty until the account is instantiated.
    pub fn is_empty(&self) -> bool {
        self.primary.is_none()
    }

    pub fn primary(&self) -> Option<Address> {
        self.primary
    }

    pub fn dual_factor_enabled(&self) -> bool {
        self.dual_factor
    }

    pub fn credential(&self, id: &H256) -> Option<&Credential> {
        self.credentials.get(id)
    }

    /// Active credential by id; inactive ones are invisible to validation.
    pub fn active_credential(&self, id: &H256) -> Option<&Credential> {
        self.credentials.get(id).filter(|c| c.active)
    }

    pub fn credentials(&self) -> impl Iterator<Item = (&H256, &Credential)> {
        self.credentials.iter()
    }

    pub fn active_count(&self) -> usize {
        self.credentials.values().filter(|c| c.active).count()
    }

    pub fn add_credential(
        &mut self,
        public_key: PasskeyPublicKey,
        tag: String,
        now: Timestamp,
    ) -> Result<H256> {
        let id = public_key.id();
        if self.credentials.contains_key(&id) {
            return Err(InvariantViolation::CredentialExists(id).into());
        }
        self.credentials.insert(
            id,
            Credential {
                public_key,
                added_at: now,
                active: true,
                tag,
            },
        );
        Ok(id)
    }

    /// Deactivate one credential. Refuses to strand dual-factor enforcement.
    pub fn deactivate(&mut self, id: &H256) -> Result<()> {
        let active = self.active_count();
        let credential = self
            .credentials
            .get_mut(id)
            .filter(|c| c.active)
            .ok_or(AuthorizationError::UnknownCredential(*id))?;
        if self.dual_factor && active == 1 {
            return Err(InvariantViolation::SecondFactorRequired.into());
        }
        credential.active = false;
        Ok(())
    }

    /// Deactivate every credential and return the ids that were active.
    pub fn deactivate_all(&mut self) -> Vec<H256> {
        let mut wiped: Vec<H256> = self
            .credentials
            .iter_mut()
            .filter(|(_, c)| c.active)
            .map(|(id, c)| {
                c.active = false;
                *id
            })
            .collect();
        wiped.sort();
        wiped
    }

    /// Recovery path: reactivate or insert a guardian-chosen key.
    pub fn install_recovered(&mut self, public_key: PasskeyPublicKey, now: Timestamp) -> H256 {
        let id = public_key.id();
        self.credentials.insert(
            id,
            Credential {
                public_key,
                added_at: now,
                active: true,
                tag: "recovered".to_string(),
            },
        );
        id
    }

    pub fn set_primary(&mut self, primary: Address) -> Result<()> {
        if primary.is_zero() {
            return Err(InvariantViolation::ZeroAddress("primary identity").into());
        }
        self.primary = Some(primary);
        Ok(())
    }

    pub fn enable_dual_factor(&mut self) -> Result<()> {
        if self.active_count() == 0 {
            return Err(InvariantViolation::SecondFactorRequired.into());
        }
        self.dual_factor = true;
        Ok(())
    }

    pub fn disable_dual_factor(&mut self) {
        self.dual_factor = false;
    }

    // --- Scoped grants ---

    pub fn grant(&self, delegate: &Address) -> Option<&ScopedGrant> {
        self.grants.get(delegate)
    }

    pub fn grant_mut(&mut self, delegate: &Address) -> Option<&mut ScopedGrant> {
        self.grants.get_mut(delegate)
    }

    pub fn grants(&self) -> impl Iterator<Item = &ScopedGrant> {
        self.grants.values()
    }

    pub fn insert_grant(&mut self, grant: ScopedGrant) -> Result<()> {
        if grant.delegate.is_zero() {
            return Err(InvariantViolation::ZeroAddress("delegate").into());
        }
        if self.grants.get(&grant.delegate).is_some_and(|g| g.active) {
            return Err(InvariantViolation::GrantExists(grant.delegate).into());
        }
        self.grants.insert(grant.delegate, grant);
        Ok(())
    }

    pub fn revoke_grant(&mut self, delegate: &Address) -> Result<()> {
        let grant = self
            .grants
            .get_mut(delegate)
            .filter(|g| g.active)
            .ok_or(AuthorizationError::UnknownGrant(*delegate))?;
        grant.active = false;
        Ok(())
    }

    /// Revoke every active grant and return the delegates that were active.
    pub fn revoke_all_grants(&mut self) -> Vec<Address> {
        let mut revoked: Vec<Address> = self
            .grants
            .values_mut()
            .filter(|g| g.active)
            .map(|g| {
                g.active = false;
                g.delegate
            })
            .collect();
        revoked.sort();
        revoked
    }
}
