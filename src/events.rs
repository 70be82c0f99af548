//! Notifications for external collaborators (indexers, device bookkeeping,
//! UIs). Events are emitted only for committed transitions and never feed
//! back into authorization.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::account::modules::ModuleKind;
use crate::account::types::{Address, Timestamp, H256};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AccountEvent {
    AccountInitialized {
        primary: Address,
        second_factor: Option<H256>,
        dual_factor: bool,
    },
    CredentialAdded {
        id: H256,
        tag: String,
    },
    CredentialRemovalProposed {
        action: H256,
        id: H256,
        matures_at: Timestamp,
    },
    CredentialRemovalExecuted {
        action: H256,
        id: H256,
    },
    CredentialRemovalCancelled {
        action: H256,
        id: H256,
    },
    PrimaryRotationProposed {
        action: H256,
        new_primary: Address,
        matures_at: Timestamp,
    },
    PrimaryRotationExecuted {
        action: H256,
        previous: Option<Address>,
        new_primary: Address,
    },
    CredentialChangeProposed {
        action: H256,
        change: String,
        matures_at: Timestamp,
    },
    CredentialChangeExecuted {
        action: H256,
        change: String,
    },
    CredentialChangeCancelled {
        action: H256,
        change: String,
    },
    DualFactorEnabled,
    DualFactorDisabled,
    GuardianAdded {
        guardian: Address,
    },
    GuardianRemoved {
        guardian: Address,
    },
    GuardianThresholdChanged {
        threshold: usize,
    },
    RecoveryInitiated {
        id: H256,
        guardian: Address,
        matures_at: Option<Timestamp>,
    },
    RecoveryApproved {
        id: H256,
        guardian: Address,
        matures_at: Option<Timestamp>,
    },
    RecoveryExecuted {
        id: H256,
        wiped: Vec<H256>,
        new_primary: Option<Address>,
        new_credential: Option<H256>,
    },
    /// Guardian set or threshold changed under an open request.
    RecoveryMaturityChanged {
        id: H256,
        matures_at: Option<Timestamp>,
    },
    RecoveryCancelled {
        id: H256,
    },
    ModuleInstalled {
        kind: ModuleKind,
        module: Address,
    },
    ModuleUninstalled {
        kind: ModuleKind,
        module: Address,
    },
    SessionGranted {
        delegate: Address,
        valid_after: Timestamp,
        valid_until: Timestamp,
    },
    SessionRevoked {
        delegate: Address,
    },
    HookRemovalScheduled {
        action: H256,
        module: Address,
        matures_at: Timestamp,
    },
    HookRemovalExecuted {
        action: H256,
        module: Address,
    },
    HookRemovalCancelled {
        action: H256,
        module: Address,
    },
}

impl AccountEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AccountEvent::AccountInitialized { .. } => "account-initialized",
            AccountEvent::CredentialAdded { .. } => "credential-added",
            AccountEvent::CredentialRemovalProposed { .. } => "credential-removal-proposed",
            AccountEvent::CredentialRemovalExecuted { .. } => "credential-removal-executed",
            AccountEvent::CredentialRemovalCancelled { .. } => "credential-removal-cancelled",
            AccountEvent::PrimaryRotationProposed { .. } => "primary-rotation-proposed",
            AccountEvent::PrimaryRotationExecuted { .. } => "primary-rotation-executed",
            AccountEvent::CredentialChangeProposed { .. } => "credential-change-proposed",
            AccountEvent::CredentialChangeExecuted { .. } => "credential-change-executed",
            AccountEvent::CredentialChangeCancelled { .. } => "credential-change-cancelled",
            AccountEvent::DualFactorEnabled => "dual-factor-enabled",
            AccountEvent::DualFactorDisabled => "dual-factor-disabled",
            AccountEvent::GuardianAdded { .. } => "guardian-added",
            AccountEvent::GuardianRemoved { .. } => "guardian-removed",
            AccountEvent::GuardianThresholdChanged { .. } => "guardian-threshold-changed",
            AccountEvent::RecoveryInitiated { .. } => "recovery-initiated",
            AccountEvent::RecoveryApproved { .. } => "recovery-approved",
            AccountEvent::RecoveryExecuted { .. } => "recovery-executed",
            AccountEvent::RecoveryMaturityChanged { .. } => "recovery-maturity-changed",
            AccountEvent::RecoveryCancelled { .. } => "recovery-cancelled",
            AccountEvent::ModuleInstalled { .. } => "module-installed",
            AccountEvent::ModuleUninstalled { .. } => "module-uninstalled",
            AccountEvent::SessionGranted { .. } => "session-granted",
            AccountEvent::SessionRevoked { .. } => "session-revoked",
            AccountEvent::HookRemovalScheduled { .. } => "hook-removal-scheduled",
            AccountEvent::HookRemovalExecuted { .. } => "hook-removal-executed",
            AccountEvent::HookRemovalCancelled { .. } => "hook-removal-cancelled",
        }
    }

    /// Publish a committed event to the log.
    pub fn log(&self, account: Address) {
        let detail = serde_json::to_string(self).unwrap_or_default();
        info!(%account, event = self.name(), %detail, "account event");
    }
}
