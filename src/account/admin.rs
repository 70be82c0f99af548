//! Self-administration
//!
//! Administrative actions travel inside an authorized request like any other
//! action. Most apply at once; the ones that could lock the owner out or
//! silently weaken protection go through a timelock and are executed later by
//! anyone.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::modules::ModuleKind;
use super::session::ScopedGrant;
use super::store::CredentialRegistry;
use super::timelock::TimelockPayload;
use super::types::{Address, Timestamp, H256};
use super::Account;
use crate::crypto::PasskeyPublicKey;
use crate::encoding::CanonicalEncode;
use crate::error::{AuthorizationError, InvariantViolation, Result, ValidationFailure};
use crate::events::AccountEvent;

/// An administrative action carried by [`super::types::Action::Admin`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum AdminCall {
    AddCredential { key: PasskeyPublicKey, tag: String },
    EnableDualFactor,
    ProposeChange(CredentialChange),
    CancelChange(H256),
    AddGuardian(Address),
    RemoveGuardian(Address),
    SetGuardianThreshold(u32),
    CancelRecovery(H256),
    GrantSession(ScopedGrant),
    RevokeSession(Address),
    InstallModule {
        kind: ModuleKind,
        module: Address,
        init: Vec<u8>,
    },
    UninstallModule {
        kind: ModuleKind,
        module: Address,
        deinit: Vec<u8>,
    },
    CancelHookRemoval(H256),
}

impl CanonicalEncode for AdminCall {
    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            AdminCall::AddCredential { key, tag } => {
                out.push(0x01);
                key.encode_into(out);
                tag.encode_into(out);
            }
            AdminCall::EnableDualFactor => out.push(0x02),
            AdminCall::ProposeChange(change) => {
                out.push(0x03);
                change.encode_into(out);
            }
            AdminCall::CancelChange(id) => {
                out.push(0x04);
                id.encode_into(out);
            }
            AdminCall::AddGuardian(guardian) => {
                out.push(0x05);
                guardian.encode_into(out);
            }
            AdminCall::RemoveGuardian(guardian) => {
                out.push(0x06);
                guardian.encode_into(out);
            }
            AdminCall::SetGuardianThreshold(threshold) => {
                out.push(0x07);
                threshold.encode_into(out);
            }
            AdminCall::CancelRecovery(id) => {
                out.push(0x08);
                id.encode_into(out);
            }
            AdminCall::GrantSession(grant) => {
                out.push(0x09);
                grant.encode_into(out);
            }
            AdminCall::RevokeSession(delegate) => {
                out.push(0x0a);
                delegate.encode_into(out);
            }
            AdminCall::InstallModule { kind, module, init } => {
                out.push(0x0b);
                kind.encode_into(out);
                module.encode_into(out);
                init.encode_into(out);
            }
            AdminCall::UninstallModule {
                kind,
                module,
                deinit,
            } => {
                out.push(0x0c);
                kind.encode_into(out);
                module.encode_into(out);
                deinit.encode_into(out);
            }
            AdminCall::CancelHookRemoval(id) => {
                out.push(0x0d);
                id.encode_into(out);
            }
        }
    }
}

/// A credential change that waits out the credential timelock.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CredentialChange {
    RotatePrimary(Address),
    RemoveCredential(H256),
    RotateCredential {
        retire: H256,
        key: PasskeyPublicKey,
        tag: String,
    },
    DisableDualFactor,
}

impl CredentialChange {
    pub fn name(&self) -> &'static str {
        match self {
            CredentialChange::RotatePrimary(_) => "rotate-primary",
            CredentialChange::RemoveCredential(_) => "remove-credential",
            CredentialChange::RotateCredential { .. } => "rotate-credential",
            CredentialChange::DisableDualFactor => "disable-dual-factor",
        }
    }

    /// Checks that make a proposal pointless to schedule. Execution re-checks
    /// everything against the state at that time.
    fn check_proposable(&self, registry: &CredentialRegistry) -> Result<()> {
        match self {
            CredentialChange::RotatePrimary(primary) => {
                if primary.is_zero() {
                    return Err(InvariantViolation::ZeroAddress("primary identity").into());
                }
            }
            CredentialChange::RemoveCredential(id) => {
                registry
                    .active_credential(id)
                    .ok_or(AuthorizationError::UnknownCredential(*id))?;
            }
            CredentialChange::RotateCredential { retire, key, .. } => {
                registry
                    .active_credential(retire)
                    .ok_or(AuthorizationError::UnknownCredential(*retire))?;
                check_key(key)?;
                if registry.credential(&key.id()).is_some() {
                    return Err(InvariantViolation::CredentialExists(key.id()).into());
                }
            }
            CredentialChange::DisableDualFactor => {
                if !registry.dual_factor_enabled() {
                    return Err(ValidationFailure::InvalidParameter(
                        "dual-factor enforcement is already off".into(),
                    )
                    .into());
                }
            }
        }
        Ok(())
    }
}

impl CanonicalEncode for CredentialChange {
    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            CredentialChange::RotatePrimary(primary) => {
                out.push(0x01);
                primary.encode_into(out);
            }
            CredentialChange::RemoveCredential(id) => {
                out.push(0x02);
                id.encode_into(out);
            }
            CredentialChange::RotateCredential { retire, key, tag } => {
                out.push(0x03);
                retire.encode_into(out);
                key.encode_into(out);
                tag.encode_into(out);
            }
            CredentialChange::DisableDualFactor => out.push(0x04),
        }
    }
}

impl TimelockPayload for CredentialChange {
    const KIND: &'static str = "credential-change";
}

/// A scheduled removal of a protective hook.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HookRemoval {
    pub module: Address,
    pub deinit: Vec<u8>,
}

impl CanonicalEncode for HookRemoval {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.module.encode_into(out);
        self.deinit.encode_into(out);
    }
}

impl TimelockPayload for HookRemoval {
    const KIND: &'static str = "hook-removal";
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum AdminOutcome {
    Applied,
    Scheduled { action: H256, matures_at: Timestamp },
}

fn check_key(key: &PasskeyPublicKey) -> Result<()> {
    if key.verifying_key().is_none() {
        return Err(ValidationFailure::InvalidParameter(
            "second factor is not a P-256 point".into(),
        )
        .into());
    }
    Ok(())
}

impl Account {
    /// Apply one administrative call. Runs on staged state; the caller
    /// commits or discards.
    pub(super) fn apply_admin(&mut self, call: AdminCall, now: Timestamp) -> Result<AdminOutcome> {
        match call {
            AdminCall::AddCredential { key, tag } => {
                check_key(&key)?;
                let id = self.registry.add_credential(key, tag.clone(), now)?;
                self.emit(AccountEvent::CredentialAdded { id, tag });
            }
            AdminCall::EnableDualFactor => {
                if !self.registry.dual_factor_enabled() {
                    self.registry.enable_dual_factor()?;
                    self.emit(AccountEvent::DualFactorEnabled);
                }
            }
            AdminCall::ProposeChange(change) => return self.propose_change(change, now),
            AdminCall::CancelChange(action) => {
                let change = self.changes.cancel(&action)?;
                self.emit(match change {
                    CredentialChange::RemoveCredential(id) => {
                        AccountEvent::CredentialRemovalCancelled { action, id }
                    }
                    other => AccountEvent::CredentialChangeCancelled {
                        action,
                        change: other.name().to_string(),
                    },
                });
            }
            AdminCall::AddGuardian(guardian) => {
                self.guardians_mut()?.add(guardian)?;
                self.emit(AccountEvent::GuardianAdded { guardian });
                self.reweigh_recoveries(now)?;
            }
            AdminCall::RemoveGuardian(guardian) => {
                self.guardians_mut()?.remove(&guardian)?;
                self.emit(AccountEvent::GuardianRemoved { guardian });
                self.reweigh_recoveries(now)?;
            }
            AdminCall::SetGuardianThreshold(threshold) => {
                let threshold = threshold as usize;
                self.guardians_mut()?.set_threshold(threshold)?;
                self.emit(AccountEvent::GuardianThresholdChanged { threshold });
                self.reweigh_recoveries(now)?;
            }
            AdminCall::CancelRecovery(id) => {
                self.recoveries.cancel(&id)?;
                self.emit(AccountEvent::RecoveryCancelled { id });
            }
            AdminCall::GrantSession(mut grant) => {
                grant.check_well_formed()?;
                grant.spent_total = 0;
                grant.active = true;
                let event = AccountEvent::SessionGranted {
                    delegate: grant.delegate,
                    valid_after: grant.valid_after,
                    valid_until: grant.valid_until,
                };
                self.registry.insert_grant(grant)?;
                self.emit(event);
            }
            AdminCall::RevokeSession(delegate) => {
                self.registry.revoke_grant(&delegate)?;
                self.emit(AccountEvent::SessionRevoked { delegate });
            }
            AdminCall::InstallModule { kind, module, init } => {
                self.modules.install(kind, module, &init)?;
                self.emit(AccountEvent::ModuleInstalled { kind, module });
            }
            AdminCall::UninstallModule {
                kind: ModuleKind::Hook,
                module,
                deinit,
            } => return self.uninstall_hook(module, deinit, now),
            AdminCall::UninstallModule {
                kind,
                module,
                deinit,
            } => {
                self.modules.uninstall(kind, module, &deinit)?;
                self.emit(AccountEvent::ModuleUninstalled { kind, module });
            }
            AdminCall::CancelHookRemoval(action) => {
                let removal = self.hook_removals.cancel(&action)?;
                self.emit(AccountEvent::HookRemovalCancelled {
                    action,
                    module: removal.module,
                });
            }
        }
        Ok(AdminOutcome::Applied)
    }

    /// Re-gate open recoveries against the current guardian set.
    fn reweigh_recoveries(&mut self, now: Timestamp) -> Result<()> {
        let guardians = self.guardians.as_ref().ok_or(ValidationFailure::NotDeployed)?;
        let changed = self.recoveries.reweigh(guardians, now)?;
        for id in changed {
            let matures_at = self.recoveries.get(&id).and_then(|r| r.matures_at);
            self.emit(AccountEvent::RecoveryMaturityChanged { id, matures_at });
        }
        Ok(())
    }

    fn propose_change(&mut self, change: CredentialChange, now: Timestamp) -> Result<AdminOutcome> {
        change.check_proposable(&self.registry)?;
        let action = self.changes.propose(change.clone(), now)?;
        let matures_at = now + self.changes.delay();
        self.emit(match change {
            CredentialChange::RemoveCredential(id) => AccountEvent::CredentialRemovalProposed {
                action,
                id,
                matures_at,
            },
            CredentialChange::RotatePrimary(new_primary) => AccountEvent::PrimaryRotationProposed {
                action,
                new_primary,
                matures_at,
            },
            other => AccountEvent::CredentialChangeProposed {
                action,
                change: other.name().to_string(),
                matures_at,
            },
        });
        Ok(AdminOutcome::Scheduled { action, matures_at })
    }

    fn uninstall_hook(&mut self, module: Address, deinit: Vec<u8>, now: Timestamp) -> Result<AdminOutcome> {
        let protective = self
            .modules
            .hook()
            .filter(|installed| installed.module == module)
            .map(|installed| installed.hook.is_protective())
            .ok_or(InvariantViolation::ModuleNotInstalled(module))?;

        if !protective {
            self.modules.remove_hook(module)?;
            self.emit(AccountEvent::ModuleUninstalled {
                kind: ModuleKind::Hook,
                module,
            });
            return Ok(AdminOutcome::Applied);
        }

        let action = self.hook_removals.propose(HookRemoval { module, deinit }, now)?;
        let matures_at = now + self.hook_removals.delay();
        info!(account = %self.address, %module, matures_at, "protective hook removal scheduled");
        self.emit(AccountEvent::HookRemovalScheduled {
            action,
            module,
            matures_at,
        });
        Ok(AdminOutcome::Scheduled { action, matures_at })
    }

    /// Apply a matured credential change.
    pub(super) fn apply_change(&mut self, action: H256, now: Timestamp) -> Result<()> {
        let change = self.changes.execute(&action, now)?;
        let name = change.name().to_string();
        match change {
            CredentialChange::RotatePrimary(new_primary) => {
                let previous = self.registry.primary();
                self.registry.set_primary(new_primary)?;
                self.emit(AccountEvent::PrimaryRotationExecuted {
                    action,
                    previous,
                    new_primary,
                });
            }
            CredentialChange::RemoveCredential(id) => {
                self.registry.deactivate(&id)?;
                self.emit(AccountEvent::CredentialRemovalExecuted { action, id });
            }
            CredentialChange::RotateCredential { retire, key, tag } => {
                check_key(&key)?;
                // Add first so enforcement never sees zero active factors.
                let id = self.registry.add_credential(key, tag.clone(), now)?;
                self.registry.deactivate(&retire)?;
                self.emit(AccountEvent::CredentialAdded { id, tag });
                self.emit(AccountEvent::CredentialChangeExecuted { action, change: name });
            }
            CredentialChange::DisableDualFactor => {
                self.registry.disable_dual_factor();
                self.emit(AccountEvent::DualFactorDisabled);
                self.emit(AccountEvent::CredentialChangeExecuted { action, change: name });
            }
        }
        Ok(())
    }

    /// Remove a hook whose removal delay has elapsed.
    pub(super) fn apply_hook_removal(&mut self, action: H256, now: Timestamp) -> Result<()> {
        let removal = self.hook_removals.execute(&action, now)?;
        self.modules.remove_hook(removal.module)?;
        self.emit(AccountEvent::HookRemovalExecuted {
            action,
            module: removal.module,
        });
        self.emit(AccountEvent::ModuleUninstalled {
            kind: ModuleKind::Hook,
            module: removal.module,
        });
        Ok(())
    }
}
