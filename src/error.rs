use thiserror::Error;

use crate::account::types::{Address, H256};

/// Taxonomy class of an [`AccountError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unverifiable credentials. Zero state mutation.
    Validation,
    /// Well-formed request that the current state does not permit.
    Authorization,
    /// Operator or programming error. Never retried automatically.
    Invariant,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationFailure),
    #[error("not authorized: {0}")]
    Authorization(#[from] AuthorizationError),
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl AccountError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccountError::Validation(_) => ErrorKind::Validation,
            AccountError::Authorization(_) => ErrorKind::Authorization,
            AccountError::Invariant(_) => ErrorKind::Invariant,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("malformed credential: {0}")]
    MalformedCredential(String),
    #[error("malformed init payload: {0}")]
    MalformedInitPayload(String),
    #[error("validator {0} is not installed")]
    ValidatorNotInstalled(Address),
    #[error("unknown module {0}")]
    UnknownModule(Address),
    #[error("primary signature does not recover to the primary identity")]
    PrimarySignatureMismatch,
    #[error("second factor assertion did not verify")]
    SecondFactorMismatch,
    #[error("second factor {0} is unknown or inactive")]
    UnknownSecondFactor(H256),
    #[error("delegate signature does not recover to {0}")]
    DelegateSignatureMismatch(Address),
    #[error("request addressed to {got}, expected {expected}")]
    WrongAccount { expected: Address, got: Address },
    #[error("account is not deployed and the request carries no init payload")]
    NotDeployed,
    #[error("account is already deployed")]
    AlreadyDeployed,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("stale nonce: expected {expected}, got {got}")]
    StaleNonce { expected: u64, got: u64 },
    #[error("pending action {0} does not exist")]
    UnknownAction(H256),
    #[error("pending action {0} was already proposed at this time")]
    DuplicateProposal(H256),
    #[error("action {id} matures at {matures_at}, now {now}")]
    NotMatured { id: H256, matures_at: u64, now: u64 },
    #[error("action {0} already executed")]
    AlreadyExecuted(H256),
    #[error("action {0} already cancelled")]
    AlreadyCancelled(H256),
    #[error("{0} is not a guardian")]
    NotGuardian(Address),
    #[error("guardian {0} already approved")]
    AlreadyApproved(Address),
    #[error("recovery {id} has {approvals} of {threshold} approvals")]
    ThresholdNotMet { id: H256, approvals: usize, threshold: usize },
    #[error("recovery request {0} does not exist")]
    UnknownRecovery(H256),
    #[error("{0} is not an installed executor")]
    NotExecutor(Address),
    #[error("credential {0} is unknown or inactive")]
    UnknownCredential(H256),
    #[error("no scoped grant for delegate {0}")]
    UnknownGrant(Address),
    #[error("scoped grant for {delegate} is not valid at {now}")]
    GrantOutsideWindow { delegate: Address, now: u64 },
    #[error("scoped grant does not allow target {0}")]
    TargetNotAllowed(Address),
    #[error("scoped grant does not allow this selector")]
    SelectorNotAllowed,
    #[error("scoped grant cannot perform administrative actions")]
    AdminNotAllowed,
    #[error("action value {value} exceeds per-action limit {limit}")]
    PerActionLimitExceeded { value: u128, limit: u128 },
    #[error("total spend {attempted} would exceed limit {limit}")]
    TotalLimitExceeded { attempted: u128, limit: u128 },
    #[error("hook rejected action: {0}")]
    HookRejected(String),
    #[error("no fallback handler for selector 0x{0}")]
    NoFallbackHandler(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("the last validator able to administer the account can never be uninstalled")]
    LastValidator,
    #[error("dual-factor enforcement requires an active second factor")]
    SecondFactorRequired,
    #[error("guardian threshold {threshold} is outside 1..={members}")]
    ThresholdOutOfRange { threshold: usize, members: usize },
    #[error("{0} is already a guardian")]
    GuardianExists(Address),
    #[error("credential {0} already registered")]
    CredentialExists(H256),
    #[error("scoped grant for {0} already exists")]
    GrantExists(Address),
    #[error("module {0} is already installed")]
    ModuleAlreadyInstalled(Address),
    #[error("module {0} is not installed")]
    ModuleNotInstalled(Address),
    #[error("hook slot is occupied by {0}")]
    HookSlotOccupied(Address),
    #[error("zero address is not a valid {0}")]
    ZeroAddress(&'static str),
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
}

pub type Result<T, E = AccountError> = std::result::Result<T, E>;
