//! Scoped delegation: time-boxed, target-restricted, spend-limited keys.
//!
//! Every addition to `spent_total` is checked, and nothing is written until
//! every check has passed, so a rejected validation leaves it untouched.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::credential::ScopedCredential;
use super::store::CredentialRegistry;
use super::types::{Action, Address, Timestamp, H256};
use crate::crypto::recover_signer;
use crate::encoding::CanonicalEncode;
use crate::error::{AuthorizationError, InvariantViolation, Result, ValidationFailure};

/// A delegated credential. Zero limits and empty allow-lists mean
/// "unrestricted"; `valid_until == 0` means no expiry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ScopedGrant {
    pub delegate: Address,
    pub valid_after: Timestamp,
    pub valid_until: Timestamp,
    pub allowed_targets: Vec<Address>,
    pub allowed_selectors: Vec<[u8; 4]>,
    pub per_action_limit: u128,
    pub total_limit: u128,
    pub spent_total: u128,
    pub active: bool,
}

impl ScopedGrant {
    pub fn new(delegate: Address, valid_after: Timestamp, valid_until: Timestamp) -> Self {
        Self {
            delegate,
            valid_after,
            valid_until,
            allowed_targets: Vec::new(),
            allowed_selectors: Vec::new(),
            per_action_limit: 0,
            total_limit: 0,
            spent_total: 0,
            active: true,
        }
    }

    pub fn with_targets(mut self, targets: Vec<Address>) -> Self {
        self.allowed_targets = targets;
        self
    }

    pub fn with_selectors(mut self, selectors: Vec<[u8; 4]>) -> Self {
        self.allowed_selectors = selectors;
        self
    }

    pub fn with_limits(mut self, per_action: u128, total: u128) -> Self {
        self.per_action_limit = per_action;
        self.total_limit = total;
        self
    }

    /// Shape checks applied when the grant is created.
    pub fn check_well_formed(&self) -> Result<()> {
        if self.delegate.is_zero() {
            return Err(InvariantViolation::ZeroAddress("delegate").into());
        }
        if self.valid_until != 0 && self.valid_until < self.valid_after {
            return Err(ValidationFailure::InvalidParameter(
                "grant window ends before it starts".into(),
            )
            .into());
        }
        if self.total_limit != 0 && self.per_action_limit > self.total_limit {
            return Err(ValidationFailure::InvalidParameter(
                "per-action limit exceeds total limit".into(),
            )
            .into());
        }
        Ok(())
    }

    pub fn is_live(&self, now: Timestamp) -> bool {
        self.active
            && now >= self.valid_after
            && (self.valid_until == 0 || now <= self.valid_until)
    }

    /// Target/selector filter plus the spend computation. Returns the new
    /// `spent_total` without writing it.
    fn admit(&self, action: &Action, account: Address) -> Result<u128> {
        if action.is_admin() {
            return Err(AuthorizationError::AdminNotAllowed.into());
        }
        for call in action.calls() {
            // Calling the account itself would reach administrative entry points.
            if call.target == account {
                return Err(AuthorizationError::TargetNotAllowed(call.target).into());
            }
            if !self.allowed_targets.is_empty() && !self.allowed_targets.contains(&call.target) {
                return Err(AuthorizationError::TargetNotAllowed(call.target).into());
            }
            if !self.allowed_selectors.is_empty() {
                let allowed = call
                    .selector()
                    .is_some_and(|selector| self.allowed_selectors.contains(&selector));
                if !allowed {
                    return Err(AuthorizationError::SelectorNotAllowed.into());
                }
            }
        }

        let value = action
            .total_value()
            .ok_or(InvariantViolation::Overflow("action value"))?;
        if self.per_action_limit != 0 && value > self.per_action_limit {
            return Err(AuthorizationError::PerActionLimitExceeded {
                value,
                limit: self.per_action_limit,
            }
            .into());
        }
        let attempted = self
            .spent_total
            .checked_add(value)
            .ok_or(InvariantViolation::Overflow("spent total"))?;
        if self.total_limit != 0 && attempted > self.total_limit {
            return Err(AuthorizationError::TotalLimitExceeded {
                attempted,
                limit: self.total_limit,
            }
            .into());
        }
        Ok(attempted)
    }
}

impl CanonicalEncode for ScopedGrant {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.delegate.encode_into(out);
        self.valid_after.encode_into(out);
        self.valid_until.encode_into(out);
        self.allowed_targets.encode_into(out);
        self.allowed_selectors.encode_into(out);
        self.per_action_limit.encode_into(out);
        self.total_limit.encode_into(out);
    }
}

/// Validate a scoped-delegation credential and, on success, record the spend.
pub fn validate(
    registry: &mut CredentialRegistry,
    inner: &[u8],
    action: &Action,
    action_hash: &H256,
    account: Address,
    now: Timestamp,
) -> Result<Address> {
    let credential = ScopedCredential::decode(inner)?;
    let delegate = credential.delegate;

    let grant = registry
        .grant(&delegate)
        .filter(|g| g.active)
        .ok_or(AuthorizationError::UnknownGrant(delegate))?;
    if !grant.is_live(now) {
        return Err(AuthorizationError::GrantOutsideWindow { delegate, now }.into());
    }

    if recover_signer(action_hash, &credential.signature) != Some(delegate) {
        return Err(ValidationFailure::DelegateSignatureMismatch(delegate).into());
    }

    let new_total = grant.admit(action, account)?;
    if let Some(grant) = registry.grant_mut(&delegate) {
        grant.spent_total = new_total;
    }
    debug!(%delegate, spent_total = new_total, "scoped delegate accepted");
    Ok(delegate)
}
