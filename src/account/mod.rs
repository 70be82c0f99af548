//! Programmable account core
//!
//! The [`Account`] routes every request to an installed validator, runs
//! the authorized action through the installed hook, and owns the
//! self-administration and guardian-recovery state machines.
//!
//! Every entry point is atomic: work happens on a staged copy of the account
//! that replaces the live one only when the whole operation succeeded.
//! Events are published on commit.

pub mod admin;
pub mod auth;
pub mod credential;
pub mod deploy;
pub mod hooks;
pub mod modules;
pub mod recovery;
pub mod session;
pub mod store;
pub mod timelock;
pub mod types;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TimelockConfig;
use crate::error::{
    AccountError, AuthorizationError, InvariantViolation, Result, ValidationFailure,
};
use crate::events::AccountEvent;

pub use admin::{AdminCall, AdminOutcome, CredentialChange, HookRemoval};
pub use auth::{CredentialSource, MfaMode};
pub use deploy::InitParams;
pub use hooks::{Hook, HookContext};
pub use modules::{ModuleKind, ModuleRegistry, ValidatorKind, MFA_VALIDATOR, SCOPED_VALIDATOR};
pub use recovery::{GuardianSet, RecoveryBook, RecoveryParams, RecoveryRequest, RecoveryStatus};
pub use session::ScopedGrant;
pub use store::CredentialRegistry;
pub use timelock::{PendingAction, PendingStatus, Timelock};
pub use types::{action_hash, Action, Address, Call, Request, Timestamp, H256};

use credential::split_validator_prefix;

/// Proof that a request passed validation against the account state it was
/// checked on. It cannot be cloned or built outside this module. Nothing is
/// committed until [`Account::execute`] consumes it, and the nonce it carries
/// makes it executable at most once.
#[derive(Debug)]
pub struct AuthorizedAction {
    account: Address,
    nonce: u64,
    action_hash: H256,
    validator: Address,
    signer: Address,
    request: Request,
}

impl AuthorizedAction {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn action_hash(&self) -> H256 {
        self.action_hash
    }

    pub fn validator(&self) -> Address {
        self.validator
    }

    /// Primary identity or delegate that signed the request.
    pub fn signer(&self) -> Address {
        self.signer
    }

    pub fn action(&self) -> &Action {
        &self.request.action
    }
}

/// What an executed action produced. The host performs `calls` in order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Receipt {
    pub account: Address,
    pub authorized_by: Address,
    pub calls: Vec<Call>,
    pub admin: Option<AdminOutcome>,
}

/// Result of a permissionless crank over every matured record.
#[derive(Debug, Default)]
pub struct CrankReport {
    pub executed: Vec<(&'static str, H256)>,
    pub failed: Vec<(&'static str, H256, AccountError)>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Account {
    address: Address,
    nonce: u64,
    registry: CredentialRegistry,
    guardians: Option<GuardianSet>,
    modules: ModuleRegistry,
    changes: Timelock<CredentialChange>,
    hook_removals: Timelock<HookRemoval>,
    recoveries: RecoveryBook,
    #[serde(skip)]
    events: Vec<AccountEvent>,
}

impl Account {
    /// A counterfactual account: addressable, not yet instantiated.
    pub fn new(address: Address, timelocks: &TimelockConfig) -> Self {
        Self {
            address,
            nonce: 0,
            registry: CredentialRegistry::default(),
            guardians: None,
            modules: ModuleRegistry::default(),
            changes: Timelock::new(timelocks.credential_delay_secs),
            hook_removals: Timelock::new(timelocks.hook_removal_delay_secs),
            recoveries: RecoveryBook::new(timelocks.recovery_delay_secs),
            events: Vec::new(),
        }
    }

    // --- Accessors ---

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn is_deployed(&self) -> bool {
        !self.registry.is_empty()
    }

    pub fn registry(&self) -> &CredentialRegistry {
        &self.registry
    }

    pub fn guardians(&self) -> Option<&GuardianSet> {
        self.guardians.as_ref()
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn pending_changes(&self) -> &Timelock<CredentialChange> {
        &self.changes
    }

    pub fn hook_removals(&self) -> &Timelock<HookRemoval> {
        &self.hook_removals
    }

    pub fn recoveries(&self) -> &RecoveryBook {
        &self.recoveries
    }

    /// Drain committed events.
    pub fn take_events(&mut self) -> Vec<AccountEvent> {
        std::mem::take(&mut self.events)
    }

    // --- Instantiation ---

    /// Instantiate from a deployment payload, as the deployer does when no
    /// first request rides along.
    pub fn deploy(&mut self, init_payload: &[u8], now: Timestamp) -> Result<()> {
        self.atomically("deploy", |account| {
            if account.is_deployed() {
                return Err(ValidationFailure::AlreadyDeployed.into());
            }
            let params = InitParams::decode(init_payload)?;
            account.instantiate(&params, now);
            Ok(())
        })
    }

    fn instantiate(&mut self, params: &InitParams, now: Timestamp) {
        self.registry = CredentialRegistry::from_init(params, now);
        self.guardians = Some(GuardianSet::new(params.primary));
        self.modules = ModuleRegistry::with_mfa_validator();
        self.emit(AccountEvent::AccountInitialized {
            primary: params.primary,
            second_factor: params.second_factor_id(),
            dual_factor: self.registry.dual_factor_enabled(),
        });
        self.emit(AccountEvent::ModuleInstalled {
            kind: ModuleKind::Validator,
            module: *MFA_VALIDATOR,
        });
        self.emit(AccountEvent::GuardianAdded {
            guardian: params.primary,
        });
    }

    // --- Authorization dispatcher ---

    /// Validate a request on a staged copy. The account itself is not
    /// touched: the nonce and any scoped spend are committed by
    /// [`Account::execute`], together with the action.
    pub fn authorize(&self, request: Request, now: Timestamp) -> Result<AuthorizedAction> {
        let mut staged = self.clone();
        staged.authorize_staged(request, now).map_err(|err| {
            warn!(account = %self.address, op = "authorize", kind = ?err.kind(), error = %err, "rejected");
            err
        })
    }

    /// Commit an authorized action. The request is validated again against
    /// the current state, so anything that changed since `authorize` (a
    /// consumed nonce, a revoked grant) rejects it. Nonce, spend and action
    /// commit together or not at all.
    pub fn execute(&mut self, authorized: AuthorizedAction, now: Timestamp) -> Result<Receipt> {
        if authorized.account != self.address {
            return Err(ValidationFailure::WrongAccount {
                expected: self.address,
                got: authorized.account,
            }
            .into());
        }
        self.atomically("execute", |account| {
            let confirmed = account.authorize_staged(authorized.request, now)?;
            account.run_action(confirmed.signer, &confirmed.request.action, now)
        })
    }

    /// Authorize and execute as one atomic step.
    pub fn handle(&mut self, request: Request, now: Timestamp) -> Result<Receipt> {
        self.atomically("handle", |account| {
            let authorized = account.authorize_staged(request, now)?;
            account.run_action(authorized.signer, &authorized.request.action, now)
        })
    }

    /// Calls issued by an installed executor module. Administrative actions
    /// are never reachable this way. `sender` must already be authenticated
    /// by the host as the caller; only its registration is checked here.
    pub fn execute_from_executor(
        &mut self,
        sender: Address,
        calls: Vec<Call>,
        now: Timestamp,
    ) -> Result<Receipt> {
        self.atomically("execute_from_executor", |account| {
            if !account.modules.is_executor(&sender) {
                return Err(AuthorizationError::NotExecutor(sender).into());
            }
            account.run_action(sender, &Action::Batch(calls), now)
        })
    }

    /// Route calldata with an unknown selector to its fallback handler. The
    /// original sender is appended to the forwarded calldata.
    pub fn fallback(&self, sender: Address, calldata: &[u8]) -> Result<Call> {
        let selector = calldata
            .get(..4)
            .and_then(|s| <[u8; 4]>::try_from(s).ok())
            .ok_or_else(|| AuthorizationError::NoFallbackHandler(hex::encode(calldata)))?;
        let handler = self
            .modules
            .fallback_handler(&selector)
            .ok_or_else(|| AuthorizationError::NoFallbackHandler(hex::encode(selector)))?;
        let mut data = calldata.to_vec();
        data.extend_from_slice(&sender.0);
        Ok(Call::new(handler, 0, data))
    }

    fn authorize_staged(&mut self, request: Request, now: Timestamp) -> Result<AuthorizedAction> {
        if request.account != self.address {
            return Err(ValidationFailure::WrongAccount {
                expected: self.address,
                got: request.account,
            }
            .into());
        }
        if request.nonce != self.nonce {
            return Err(AuthorizationError::StaleNonce {
                expected: self.nonce,
                got: request.nonce,
            }
            .into());
        }

        let action_hash = request.action_hash();
        let (validator, inner) = split_validator_prefix(&request.credential)?;

        let signer = if self.is_deployed() {
            if request.init_payload.is_some() {
                return Err(ValidationFailure::AlreadyDeployed.into());
            }
            match self.modules.validator(&validator) {
                Some(ValidatorKind::MultiFactor) => {
                    auth::validate(CredentialSource::Stored(&self.registry), inner, &action_hash)?
                }
                Some(ValidatorKind::ScopedDelegation) => session::validate(
                    &mut self.registry,
                    inner,
                    &request.action,
                    &action_hash,
                    self.address,
                    now,
                )?,
                None => return Err(ValidationFailure::ValidatorNotInstalled(validator).into()),
            }
        } else {
            let payload = request
                .init_payload
                .as_deref()
                .ok_or(ValidationFailure::NotDeployed)?;
            let params = InitParams::decode(payload)?;
            // Only the MFA validator exists before instantiation.
            if validator != *MFA_VALIDATOR {
                return Err(ValidationFailure::ValidatorNotInstalled(validator).into());
            }
            let signer = auth::validate(CredentialSource::Counterfactual(&params), inner, &action_hash)?;
            self.instantiate(&params, now);
            signer
        };

        self.nonce = self
            .nonce
            .checked_add(1)
            .ok_or(InvariantViolation::Overflow("nonce"))?;
        debug!(account = %self.address, %validator, %signer, nonce = request.nonce, "request authorized");

        Ok(AuthorizedAction {
            account: self.address,
            nonce: request.nonce,
            action_hash,
            validator,
            signer,
            request,
        })
    }

    fn run_action(&mut self, authorized_by: Address, action: &Action, now: Timestamp) -> Result<Receipt> {
        let calls = action.calls().to_vec();
        let value = action
            .total_value()
            .ok_or(InvariantViolation::Overflow("action value"))?;
        let ctx = HookContext {
            calls: &calls,
            value,
            now,
        };

        let hook_before = self.modules.hook().map(|installed| installed.module);
        if let Some(installed) = self.modules.hook() {
            installed.hook.pre_check(&ctx)?;
        }

        let admin = match action {
            Action::Admin(call) => Some(self.apply_admin(call.clone(), now)?),
            Action::Call(_) | Action::Batch(_) => None,
        };

        // Post-check only runs on the hook that saw the pre-check.
        if let Some(installed) = self.modules.hook_mut() {
            if Some(installed.module) == hook_before {
                installed.hook.post_check(&ctx)?;
            }
        }

        Ok(Receipt {
            account: self.address,
            authorized_by,
            calls,
            admin,
        })
    }

    // --- Timelocked self-administration ---

    /// Execute a matured credential change. Anyone may call this.
    pub fn execute_change(&mut self, action: H256, now: Timestamp) -> Result<()> {
        self.atomically("execute_change", |account| account.apply_change(action, now))
    }

    /// Execute a matured protective-hook removal. Anyone may call this.
    pub fn execute_hook_removal(&mut self, action: H256, now: Timestamp) -> Result<()> {
        self.atomically("execute_hook_removal", |account| {
            account.apply_hook_removal(action, now)
        })
    }

    // --- Guardian recovery ---

    /// First approval of a new recovery request by `guardian`.
    ///
    /// `guardian` is the message sender and must already be authenticated by
    /// the host. This call only checks that it is a current guardian, the same
    /// way `execute_from_executor` trusts its `sender`.
    pub fn initiate_recovery(
        &mut self,
        guardian: Address,
        params: RecoveryParams,
        now: Timestamp,
    ) -> Result<H256> {
        self.atomically("initiate_recovery", |account| {
            let address = account.address;
            let guardians = account.guardians.as_ref().ok_or(ValidationFailure::NotDeployed)?;
            let id = account
                .recoveries
                .initiate(address, guardians, guardian, params, now)?;
            let matures_at = account.recoveries.get(&id).and_then(|r| r.matures_at);
            account.emit(AccountEvent::RecoveryInitiated {
                id,
                guardian,
                matures_at,
            });
            Ok(id)
        })
    }

    /// Record `guardian`'s approval. Returns the maturity time once the
    /// threshold has been reached.
    ///
    /// As with `initiate_recovery`, the host authenticates `guardian` as the
    /// sender before calling; no signature is checked here.
    pub fn approve_recovery(
        &mut self,
        guardian: Address,
        id: H256,
        now: Timestamp,
    ) -> Result<Option<Timestamp>> {
        self.atomically("approve_recovery", |account| {
            let guardians = account.guardians.as_ref().ok_or(ValidationFailure::NotDeployed)?;
            let matures_at = account.recoveries.approve(&id, guardians, guardian, now)?;
            account.emit(AccountEvent::RecoveryApproved {
                id,
                guardian,
                matures_at,
            });
            Ok(matures_at)
        })
    }

    /// Execute a matured recovery. Anyone may call this.
    pub fn execute_recovery(&mut self, id: H256, now: Timestamp) -> Result<()> {
        self.atomically("execute_recovery", |account| account.apply_recovery(id, now))
    }

    fn apply_recovery(&mut self, id: H256, now: Timestamp) -> Result<()> {
        let guardians = self.guardians.as_ref().ok_or(ValidationFailure::NotDeployed)?;
        let params = self.recoveries.execute(&id, guardians, now)?;

        let wiped = self.registry.deactivate_all();
        if let Some(primary) = params.new_primary {
            self.registry.set_primary(primary)?;
        }
        let new_credential = match params.new_secondary_key {
            Some(key) => Some(self.registry.install_recovered(key, now)),
            None => {
                if self.registry.dual_factor_enabled() {
                    self.registry.disable_dual_factor();
                    self.emit(AccountEvent::DualFactorDisabled);
                }
                None
            }
        };

        for delegate in self.registry.revoke_all_grants() {
            self.emit(AccountEvent::SessionRevoked { delegate });
        }
        for (action, change) in self.changes.cancel_all_open() {
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
        for (action, removal) in self.hook_removals.cancel_all_open() {
            self.emit(AccountEvent::HookRemovalCancelled {
                action,
                module: removal.module,
            });
        }

        info!(account = %self.address, recovery = %id, wiped = wiped.len(), "recovery executed");
        self.emit(AccountEvent::RecoveryExecuted {
            id,
            wiped,
            new_primary: params.new_primary,
            new_credential,
        });
        Ok(())
    }

    // --- Maintenance ---

    /// Execute every matured credential change, hook removal and recovery.
    /// Each record is attempted on its own; one failure does not stop the rest.
    pub fn crank(&mut self, now: Timestamp) -> CrankReport {
        let mut report = CrankReport::default();

        for action in self.changes.matured(now) {
            match self.execute_change(action, now) {
                Ok(()) => report.executed.push(("credential-change", action)),
                Err(e) => report.failed.push(("credential-change", action, e)),
            }
        }
        for action in self.hook_removals.matured(now) {
            match self.execute_hook_removal(action, now) {
                Ok(()) => report.executed.push(("hook-removal", action)),
                Err(e) => report.failed.push(("hook-removal", action, e)),
            }
        }
        let matured_recoveries = match &self.guardians {
            Some(guardians) => self.recoveries.matured(guardians, now),
            None => Vec::new(),
        };
        for id in matured_recoveries {
            match self.execute_recovery(id, now) {
                Ok(()) => report.executed.push(("recovery", id)),
                Err(e) => report.failed.push(("recovery", id, e)),
            }
        }
        report
    }

    // --- Internals ---

    fn emit(&mut self, event: AccountEvent) {
        self.events.push(event);
    }

    fn guardians_mut(&mut self) -> Result<&mut GuardianSet> {
        self.guardians
            .as_mut()
            .ok_or_else(|| ValidationFailure::NotDeployed.into())
    }

    /// Run `op` on a staged copy and commit it only on success.
    fn atomically<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut Account) -> Result<T>,
    ) -> Result<T> {
        let mut staged = self.clone();
        let published = staged.events.len();
        match f(&mut staged) {
            Ok(value) => {
                for event in &staged.events[published..] {
                    event.log(self.address);
                }
                *self = staged;
                Ok(value)
            }
            Err(err) => {
                warn!(account = %self.address, op, kind = ?err.kind(), error = %err, "rejected");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::credential::with_validator_prefix;
    use crate::account::hooks::value_cap_init;
    use crate::crypto::{KeyPair, PasskeyPair};
    use crate::error::ErrorKind;

    const NOW: Timestamp = 1_700_000_000;

    fn timelocks() -> TimelockConfig {
        TimelockConfig {
            credential_delay_secs: 100,
            recovery_delay_secs: 300,
            hook_removal_delay_secs: 50,
        }
    }

    fn deployed(primary: &KeyPair) -> Account {
        let mut account = Account::new(Address([0xac; 20]), &timelocks());
        let payload = InitParams {
            primary: primary.address(),
            second_factor: None,
            dual_factor: false,
        }
        .encode(H256::ZERO);
        account.deploy(&payload, NOW).unwrap();
        account
    }

    fn signed(account: &Account, key: &KeyPair, action: Action) -> Request {
        let request = Request::new(account.address(), account.nonce(), action);
        let sig = key.sign_hash(&request.action_hash()).unwrap();
        request.with_credential(with_validator_prefix(*MFA_VALIDATOR, &sig))
    }

    fn transfer(value: u128) -> Action {
        Action::Call(Call::new(Address([0x22; 20]), value, vec![]))
    }

    #[test]
    fn test_deploy_sets_up_defaults() {
        let primary = KeyPair::generate();
        let mut account = deployed(&primary);
        assert!(account.is_deployed());
        assert_eq!(account.registry().primary(), Some(primary.address()));
        assert_eq!(account.modules().validators(), vec![*MFA_VALIDATOR]);
        let guardians = account.guardians().unwrap();
        assert!(guardians.contains(&primary.address()));
        assert_eq!(guardians.threshold(), 1);
        assert_eq!(account.take_events().len(), 3);
        assert!(account.take_events().is_empty());

        let payload = InitParams {
            primary: primary.address(),
            second_factor: None,
            dual_factor: false,
        }
        .encode(H256::ZERO);
        assert_eq!(
            account.deploy(&payload, NOW),
            Err(ValidationFailure::AlreadyDeployed.into())
        );
    }

    #[test]
    fn test_nonce_is_consumed_once() {
        let primary = KeyPair::generate();
        let mut account = deployed(&primary);
        let request = signed(&account, &primary, transfer(1));
        let replay = request.clone();

        let receipt = account.handle(request, NOW).unwrap();
        assert_eq!(receipt.calls.len(), 1);
        assert_eq!(receipt.authorized_by, primary.address());
        assert_eq!(account.nonce(), 1);

        let err = account.handle(replay, NOW).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(account.nonce(), 1);
    }

    #[test]
    fn test_authorize_then_execute() {
        let primary = KeyPair::generate();
        let mut account = deployed(&primary);
        let authorized = account
            .authorize(signed(&account, &primary, transfer(5)), NOW)
            .unwrap();
        assert_eq!(authorized.signer(), primary.address());
        assert_eq!(authorized.nonce(), 0);
        let receipt = account.execute(authorized, NOW).unwrap();
        assert_eq!(receipt.calls[0].value, 5);
    }

    #[test]
    fn test_authorize_commits_nothing_until_execute() {
        let primary = KeyPair::generate();
        let delegate = KeyPair::generate();
        let mut account = deployed(&primary);
        for call in [
            AdminCall::InstallModule {
                kind: ModuleKind::Validator,
                module: *SCOPED_VALIDATOR,
                init: vec![],
            },
            AdminCall::GrantSession(ScopedGrant::new(delegate.address(), 0, 0).with_limits(0, 100)),
            AdminCall::InstallModule {
                kind: ModuleKind::Hook,
                module: *modules::VALUE_CAP_HOOK,
                init: value_cap_init(10, 3_600, false),
            },
        ] {
            account
                .handle(signed(&account, &primary, Action::Admin(call)), NOW)
                .unwrap();
        }
        let delegated = |account: &Account, value: u128| {
            let request = Request::new(account.address(), account.nonce(), transfer(value));
            let inner = credential::ScopedCredential {
                delegate: delegate.address(),
                signature: delegate.sign_hash(&request.action_hash()).unwrap(),
            }
            .encode();
            request.with_credential(with_validator_prefix(*SCOPED_VALIDATOR, &inner))
        };
        let spent = |account: &Account| account.registry().grant(&delegate.address()).unwrap().spent_total;

        let authorized = account.authorize(delegated(&account, 50), NOW).unwrap();
        assert_eq!(account.nonce(), 3);
        assert_eq!(spent(&account), 0);
        assert!(matches!(
            account.execute(authorized, NOW),
            Err(AccountError::Authorization(AuthorizationError::HookRejected(_)))
        ));
        assert_eq!(account.nonce(), 3);
        assert_eq!(spent(&account), 0);

        let request = delegated(&account, 5);
        let first = account.authorize(request.clone(), NOW).unwrap();
        let second = account.authorize(request, NOW).unwrap();
        account.execute(first, NOW).unwrap();
        assert_eq!(account.nonce(), 4);
        assert_eq!(spent(&account), 5);
        assert_eq!(
            account.execute(second, NOW),
            Err(AuthorizationError::StaleNonce { expected: 4, got: 3 }.into())
        );
        assert_eq!(spent(&account), 5);
    }

    #[test]
    fn test_rejects_uninstalled_validator() {
        let primary = KeyPair::generate();
        let mut account = deployed(&primary);
        let request = Request::new(account.address(), 0, transfer(1));
        let sig = primary.sign_hash(&request.action_hash()).unwrap();
        let request = request.with_credential(with_validator_prefix(*SCOPED_VALIDATOR, &sig));
        assert_eq!(
            account.handle(request, NOW),
            Err(ValidationFailure::ValidatorNotInstalled(*SCOPED_VALIDATOR).into())
        );
        assert_eq!(account.nonce(), 0);
    }

    #[test]
    fn test_failed_admin_leaves_no_trace() {
        let primary = KeyPair::generate();
        let mut account = deployed(&primary);
        account.take_events();
        let before = account.clone();

        let request = signed(
            &account,
            &primary,
            Action::Admin(AdminCall::SetGuardianThreshold(2)),
        );
        let err = account.handle(request, NOW).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invariant);
        assert_eq!(account.nonce(), before.nonce());
        assert_eq!(account.guardians(), before.guardians());
        assert!(account.take_events().is_empty());
    }

    #[test]
    fn test_hook_rejection_reverts_nonce_in_handle() {
        let primary = KeyPair::generate();
        let mut account = deployed(&primary);
        let install = signed(
            &account,
            &primary,
            Action::Admin(AdminCall::InstallModule {
                kind: ModuleKind::Hook,
                module: *modules::VALUE_CAP_HOOK,
                init: value_cap_init(10, 3_600, false),
            }),
        );
        account.handle(install, NOW).unwrap();

        let too_much = signed(&account, &primary, transfer(11));
        assert!(matches!(
            account.handle(too_much, NOW),
            Err(AccountError::Authorization(AuthorizationError::HookRejected(_)))
        ));
        assert_eq!(account.nonce(), 1);

        account.handle(signed(&account, &primary, transfer(10)), NOW).unwrap();
        assert!(account
            .handle(signed(&account, &primary, transfer(1)), NOW + 10)
            .is_err());
        account
            .handle(signed(&account, &primary, transfer(1)), NOW + 3_600)
            .unwrap();
    }

    #[test]
    fn test_protective_hook_removal_is_timelocked() {
        let primary = KeyPair::generate();
        let mut account = deployed(&primary);
        let module = *modules::VALUE_CAP_HOOK;
        account
            .handle(
                signed(
                    &account,
                    &primary,
                    Action::Admin(AdminCall::InstallModule {
                        kind: ModuleKind::Hook,
                        module,
                        init: value_cap_init(10, 3_600, true),
                    }),
                ),
                NOW,
            )
            .unwrap();

        let receipt = account
            .handle(
                signed(
                    &account,
                    &primary,
                    Action::Admin(AdminCall::UninstallModule {
                        kind: ModuleKind::Hook,
                        module,
                        deinit: vec![],
                    }),
                ),
                NOW,
            )
            .unwrap();
        let action = match receipt.admin {
            Some(AdminOutcome::Scheduled { action, matures_at }) => {
                assert_eq!(matures_at, NOW + 50);
                action
            }
            other => panic!("expected a scheduled removal, got {:?}", other),
        };
        assert!(account.modules().hook().is_some());
        assert!(account.execute_hook_removal(action, NOW + 49).is_err());
        account.execute_hook_removal(action, NOW + 50).unwrap();
        assert!(account.modules().hook().is_none());
    }

    #[test]
    fn test_executor_calls_and_fallback() {
        let primary = KeyPair::generate();
        let mut account = deployed(&primary);
        let executor = Address([0xee; 20]);
        let calls = vec![Call::new(Address([1; 20]), 3, vec![])];
        assert_eq!(
            account.execute_from_executor(executor, calls.clone(), NOW),
            Err(AuthorizationError::NotExecutor(executor).into())
        );

        account
            .handle(
                signed(
                    &account,
                    &primary,
                    Action::Admin(AdminCall::InstallModule {
                        kind: ModuleKind::Executor,
                        module: executor,
                        init: vec![],
                    }),
                ),
                NOW,
            )
            .unwrap();
        let receipt = account.execute_from_executor(executor, calls.clone(), NOW).unwrap();
        assert_eq!(receipt.calls, calls);
        assert_eq!(receipt.authorized_by, executor);

        let handler = Address([0xfa; 20]);
        let selector = [0xbc, 0x19, 0x7c, 0x81];
        account
            .handle(
                signed(
                    &account,
                    &primary,
                    Action::Admin(AdminCall::InstallModule {
                        kind: ModuleKind::FallbackHandler,
                        module: handler,
                        init: selector.to_vec(),
                    }),
                ),
                NOW,
            )
            .unwrap();
        let sender = Address([0x5e; 20]);
        let forwarded = account.fallback(sender, &[0xbc, 0x19, 0x7c, 0x81, 0xff]).unwrap();
        assert_eq!(forwarded.target, handler);
        assert_eq!(&forwarded.data[5..], &sender.0);
        assert!(account.fallback(sender, &[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_counterfactual_first_request_instantiates() {
        let primary = KeyPair::generate();
        let passkey = PasskeyPair::generate();
        let payload = InitParams {
            primary: primary.address(),
            second_factor: Some(passkey.public_key()),
            dual_factor: false,
        }
        .encode(H256([1; 32]));
        let mut account = Account::new(Address([0xcf; 20]), &timelocks());

        let request = Request::new(account.address(), 0, transfer(1));
        assert_eq!(
            account.handle(request.clone(), NOW),
            Err(ValidationFailure::NotDeployed.into())
        );

        let request = request.with_init_payload(payload);
        let sig = primary.sign_hash(&request.action_hash()).unwrap();
        let request = request.with_credential(with_validator_prefix(*MFA_VALIDATOR, &sig));
        account.handle(request, NOW).unwrap();
        assert!(account.is_deployed());
        assert_eq!(account.registry().active_count(), 1);
        assert_eq!(account.nonce(), 1);
    }
}
