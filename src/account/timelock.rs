//! Generic propose → mature → execute | cancel engine.
//!
//! Waiting is a precondition checked at call time (`now >= matures_at`),
//! never a scheduled callback. Executed and cancelled are terminal and
//! mutually exclusive.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::types::{Timestamp, H256};
use crate::crypto::keccak256;
use crate::encoding::CanonicalEncode;
use crate::error::{AuthorizationError, InvariantViolation, Result};

/// A payload that can sit behind a timelock.
pub trait TimelockPayload: CanonicalEncode + Clone {
    /// Distinguishes payload families that share an engine type.
    const KIND: &'static str;
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingStatus {
    Proposed,
    Matured,
    Executed,
    Cancelled,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PendingAction<P> {
    pub payload: P,
    pub proposed_at: Timestamp,
    pub matures_at: Timestamp,
    pub executed: bool,
    pub cancelled: bool,
}

impl<P> PendingAction<P> {
    pub fn is_terminal(&self) -> bool {
        self.executed || self.cancelled
    }

    pub fn status(&self, now: Timestamp) -> PendingStatus {
        if self.executed {
            PendingStatus::Executed
        } else if self.cancelled {
            PendingStatus::Cancelled
        } else if now >= self.matures_at {
            PendingStatus::Matured
        } else {
            PendingStatus::Proposed
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Timelock<P> {
    delay: u64,
    actions: HashMap<H256, PendingAction<P>>,
}

impl<P: TimelockPayload> Timelock<P> {
    pub fn new(delay: u64) -> Self {
        Self {
            delay,
            actions: HashMap::new(),
        }
    }

    pub fn delay(&self) -> u64 {
        self.delay
    }

    /// `keccak256(kind || canonical(payload) || proposed_at)`
    pub fn action_id(payload: &P, proposed_at: Timestamp) -> H256 {
        let mut buf = Vec::new();
        P::KIND.to_string().encode_into(&mut buf);
        payload.encode_into(&mut buf);
        proposed_at.encode_into(&mut buf);
        keccak256(&buf)
    }

    pub fn propose(&mut self, payload: P, now: Timestamp) -> Result<H256> {
        let id = Self::action_id(&payload, now);
        if self.actions.contains_key(&id) {
            return Err(AuthorizationError::DuplicateProposal(id).into());
        }
        let matures_at = now
            .checked_add(self.delay)
            .ok_or(InvariantViolation::Overflow("maturity"))?;
        self.actions.insert(
            id,
            PendingAction {
                payload,
                proposed_at: now,
                matures_at,
                executed: false,
                cancelled: false,
            },
        );
        Ok(id)
    }

    /// Mark a matured action executed and hand back its payload so the caller
    /// can apply the effect. Who calls this does not matter.
    pub fn execute(&mut self, id: &H256, now: Timestamp) -> Result<P> {
        let action = self.open_mut(id)?;
        if now < action.matures_at {
            return Err(AuthorizationError::NotMatured {
                id: *id,
                matures_at: action.matures_at,
                now,
            }
            .into());
        }
        action.executed = true;
        Ok(action.payload.clone())
    }

    /// The caller is responsible for having freshly authorized the request.
    pub fn cancel(&mut self, id: &H256) -> Result<P> {
        let action = self.open_mut(id)?;
        action.cancelled = true;
        Ok(action.payload.clone())
    }

    /// Cancel every non-terminal action, returning their ids.
    pub fn cancel_all_open(&mut self) -> Vec<(H256, P)> {
        let mut cancelled: Vec<(H256, P)> = self
            .actions
            .iter_mut()
            .filter(|(_, a)| !a.is_terminal())
            .map(|(id, a)| {
                a.cancelled = true;
                (*id, a.payload.clone())
            })
            .collect();
        cancelled.sort_by_key(|(id, _)| *id);
        cancelled
    }

    pub fn get(&self, id: &H256) -> Option<&PendingAction<P>> {
        self.actions.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&H256, &PendingAction<P>)> {
        self.actions.iter()
    }

    /// Ids of actions executable at `now`, oldest first.
    pub fn matured(&self, now: Timestamp) -> Vec<H256> {
        let mut ready: Vec<(&H256, &PendingAction<P>)> = self
            .actions
            .iter()
            .filter(|(_, a)| a.status(now) == PendingStatus::Matured)
            .collect();
        ready.sort_by_key(|(id, a)| (a.matures_at, **id));
        ready.into_iter().map(|(id, _)| *id).collect()
    }

    fn open_mut(&mut self, id: &H256) -> Result<&mut PendingAction<P>> {
        let action = self
            .actions
            .get_mut(id)
            .ok_or(AuthorizationError::UnknownAction(*id))?;
        if action.executed {
            return Err(AuthorizationError::AlreadyExecuted(*id).into());
        }
        if action.cancelled {
            return Err(AuthorizationError::AlreadyCancelled(*id).into());
        }
        Ok(action)
    }
}
