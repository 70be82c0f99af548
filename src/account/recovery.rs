//! Guardian threshold recovery
//!
//! Guardians approve a request asynchronously and in any order. The delay
//! starts the moment the approval count first reaches the threshold; before
//! that a request can never mature. Approvals are always weighed against the
//! guardian set as it is at the time of the check.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::types::{Address, Timestamp, H256};
use crate::crypto::{keccak256, PasskeyPublicKey};
use crate::encoding::CanonicalEncode;
use crate::error::{AuthorizationError, InvariantViolation, Result, ValidationFailure};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GuardianSet {
    members: BTreeSet<Address>,
    threshold: usize,
}

impl GuardianSet {
    /// A set of one guardian with threshold 1.
    pub fn new(first: Address) -> Self {
        let mut members = BTreeSet::new();
        members.insert(first);
        Self {
            members,
            threshold: 1,
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &Address> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn contains(&self, guardian: &Address) -> bool {
        self.members.contains(guardian)
    }

    pub fn add(&mut self, guardian: Address) -> Result<()> {
        if guardian.is_zero() {
            return Err(InvariantViolation::ZeroAddress("guardian").into());
        }
        if !self.members.insert(guardian) {
            return Err(InvariantViolation::GuardianExists(guardian).into());
        }
        Ok(())
    }

    /// Remove a guardian. The threshold is never silently lowered.
    pub fn remove(&mut self, guardian: &Address) -> Result<()> {
        if !self.members.contains(guardian) {
            return Err(AuthorizationError::NotGuardian(*guardian).into());
        }
        let remaining = self.members.len() - 1;
        if self.threshold > remaining {
            return Err(InvariantViolation::ThresholdOutOfRange {
                threshold: self.threshold,
                members: remaining,
            }
            .into());
        }
        self.members.remove(guardian);
        Ok(())
    }

    pub fn set_threshold(&mut self, threshold: usize) -> Result<()> {
        if threshold == 0 || threshold > self.members.len() {
            return Err(InvariantViolation::ThresholdOutOfRange {
                threshold,
                members: self.members.len(),
            }
            .into());
        }
        self.threshold = threshold;
        Ok(())
    }

    /// Approvals that still count: those from current members.
    pub fn weigh(&self, approvals: &BTreeSet<Address>) -> usize {
        approvals.intersection(&self.members).count()
    }
}

/// What a recovery replaces. At least one field must be set.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RecoveryParams {
    pub new_secondary_key: Option<PasskeyPublicKey>,
    pub new_primary: Option<Address>,
}

impl RecoveryParams {
    pub fn validate(&self) -> Result<()> {
        if self.new_secondary_key.is_none() && self.new_primary.is_none() {
            return Err(ValidationFailure::InvalidParameter(
                "recovery must replace the primary identity or the second factor".into(),
            )
            .into());
        }
        if self.new_primary.is_some_and(|p| p.is_zero()) {
            return Err(InvariantViolation::ZeroAddress("primary identity").into());
        }
        if let Some(key) = &self.new_secondary_key {
            if key.verifying_key().is_none() {
                return Err(ValidationFailure::InvalidParameter(
                    "recovery key is not a P-256 point".into(),
                )
                .into());
            }
        }
        Ok(())
    }
}

impl CanonicalEncode for RecoveryParams {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.new_secondary_key.encode_into(out);
        self.new_primary.encode_into(out);
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryStatus {
    Approving,
    ThresholdMet,
    Matured,
    Executed,
    Cancelled,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RecoveryRequest {
    pub params: RecoveryParams,
    pub initiated_at: Timestamp,
    pub approvals: BTreeSet<Address>,
    pub matures_at: Option<Timestamp>,
    pub executed: bool,
    pub cancelled: bool,
}

impl RecoveryRequest {
    pub fn is_terminal(&self) -> bool {
        self.executed || self.cancelled
    }

    pub fn status(&self, guardians: &GuardianSet, now: Timestamp) -> RecoveryStatus {
        if self.executed {
            return RecoveryStatus::Executed;
        }
        if self.cancelled {
            return RecoveryStatus::Cancelled;
        }
        let met = guardians.weigh(&self.approvals) >= guardians.threshold();
        match self.matures_at {
            Some(at) if met && now >= at => RecoveryStatus::Matured,
            Some(_) if met => RecoveryStatus::ThresholdMet,
            _ => RecoveryStatus::Approving,
        }
    }
}

/// Every recovery request of one account.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RecoveryBook {
    delay: u64,
    sequence: u64,
    requests: HashMap<H256, RecoveryRequest>,
}

impl RecoveryBook {
    pub fn new(delay: u64) -> Self {
        Self {
            delay,
            sequence: 0,
            requests: HashMap::new(),
        }
    }

    pub fn delay(&self) -> u64 {
        self.delay
    }

    pub fn get(&self, id: &H256) -> Option<&RecoveryRequest> {
        self.requests.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&H256, &RecoveryRequest)> {
        self.requests.iter()
    }

    /// First approval. Returns the new request id.
    pub fn initiate(
        &mut self,
        account: Address,
        guardians: &GuardianSet,
        guardian: Address,
        params: RecoveryParams,
        now: Timestamp,
    ) -> Result<H256> {
        if !guardians.contains(&guardian) {
            return Err(AuthorizationError::NotGuardian(guardian).into());
        }
        params.validate()?;

        let mut buf = Vec::new();
        account.encode_into(&mut buf);
        params.encode_into(&mut buf);
        now.encode_into(&mut buf);
        self.sequence.encode_into(&mut buf);
        let id = keccak256(&buf);
        self.sequence = self
            .sequence
            .checked_add(1)
            .ok_or(InvariantViolation::Overflow("recovery sequence"))?;

        let mut request = RecoveryRequest {
            params,
            initiated_at: now,
            approvals: BTreeSet::new(),
            matures_at: None,
            executed: false,
            cancelled: false,
        };
        request.approvals.insert(guardian);
        self.fix_maturity(&mut request, guardians, now)?;
        self.requests.insert(id, request);
        Ok(id)
    }

    /// Add one approval. Returns the maturity time once the threshold is met.
    pub fn approve(
        &mut self,
        id: &H256,
        guardians: &GuardianSet,
        guardian: Address,
        now: Timestamp,
    ) -> Result<Option<Timestamp>> {
        if !guardians.contains(&guardian) {
            return Err(AuthorizationError::NotGuardian(guardian).into());
        }
        let delay = self.delay;
        let request = self.open_mut(id)?;
        if request.approvals.contains(&guardian) {
            return Err(AuthorizationError::AlreadyApproved(guardian).into());
        }
        let met_before = guardians.weigh(&request.approvals) >= guardians.threshold();
        request.approvals.insert(guardian);
        let met = guardians.weigh(&request.approvals) >= guardians.threshold();
        // A maturity time left over from weight that has since been lost is
        // stale: the delay restarts when the threshold is met again.
        if met && (request.matures_at.is_none() || !met_before) {
            request.matures_at = Some(
                now.checked_add(delay)
                    .ok_or(InvariantViolation::Overflow("recovery maturity"))?,
            );
        }
        Ok(request.matures_at)
    }

    /// Mark a matured request executed and return what it replaces.
    pub fn execute(&mut self, id: &H256, guardians: &GuardianSet, now: Timestamp) -> Result<RecoveryParams> {
        let request = self.open_mut(id)?;
        let approvals = guardians.weigh(&request.approvals);
        let threshold = guardians.threshold();
        let matures_at = match request.matures_at {
            Some(at) if approvals >= threshold => at,
            _ => {
                return Err(AuthorizationError::ThresholdNotMet {
                    id: *id,
                    approvals,
                    threshold,
                }
                .into())
            }
        };
        if now < matures_at {
            return Err(AuthorizationError::NotMatured {
                id: *id,
                matures_at,
                now,
            }
            .into());
        }
        request.executed = true;
        Ok(request.params.clone())
    }

    pub fn cancel(&mut self, id: &H256) -> Result<()> {
        self.open_mut(id)?.cancelled = true;
        Ok(())
    }

    /// Re-gate every open request after the guardian set or threshold
    /// changed. A request that newly meets the threshold starts a full delay
    /// from `now`; one that no longer meets it loses its maturity time.
    /// Returns the ids whose maturity changed.
    pub fn reweigh(&mut self, guardians: &GuardianSet, now: Timestamp) -> Result<Vec<H256>> {
        let matures_at = now
            .checked_add(self.delay)
            .ok_or(InvariantViolation::Overflow("recovery maturity"))?;
        let mut changed = Vec::new();
        for (id, request) in self.requests.iter_mut() {
            if request.is_terminal() {
                continue;
            }
            let met = guardians.weigh(&request.approvals) >= guardians.threshold();
            match (met, request.matures_at) {
                (true, None) => request.matures_at = Some(matures_at),
                (false, Some(_)) => request.matures_at = None,
                _ => continue,
            }
            changed.push(*id);
        }
        changed.sort();
        Ok(changed)
    }

    /// Ids of requests executable at `now`, oldest first.
    pub fn matured(&self, guardians: &GuardianSet, now: Timestamp) -> Vec<H256> {
        let mut ready: Vec<(Timestamp, H256)> = self
            .requests
            .iter()
            .filter(|(_, r)| r.status(guardians, now) == RecoveryStatus::Matured)
            .filter_map(|(id, r)| r.matures_at.map(|at| (at, *id)))
            .collect();
        ready.sort();
        ready.into_iter().map(|(_, id)| id).collect()
    }

    fn fix_maturity(
        &self,
        request: &mut RecoveryRequest,
        guardians: &GuardianSet,
        now: Timestamp,
    ) -> Result<()> {
        if guardians.weigh(&request.approvals) >= guardians.threshold() {
            request.matures_at = Some(
                now.checked_add(self.delay)
                    .ok_or(InvariantViolation::Overflow("recovery maturity"))?,
            );
        }
        Ok(())
    }

    fn open_mut(&mut self, id: &H256) -> Result<&mut RecoveryRequest> {
        let request = self
            .requests
            .get_mut(id)
            .ok_or(AuthorizationError::UnknownRecovery(*id))?;
        if request.executed {
            return Err(AuthorizationError::AlreadyExecuted(*id).into());
        }
        if request.cancelled {
            return Err(AuthorizationError::AlreadyCancelled(*id).into());
        }
        Ok(request)
    }
}
