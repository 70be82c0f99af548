use compass_account::account::credential::{
    with_validator_prefix, DualFactorCredential, ScopedCredential,
};
use compass_account::account::{
    Account, Action, Address, AdminCall, AdminOutcome, Call, CredentialChange, InitParams,
    ModuleKind, RecoveryParams, RecoveryStatus, Request, ScopedGrant, H256, MFA_VALIDATOR,
    SCOPED_VALIDATOR,
};
use compass_account::config::TimelockConfig;
use compass_account::crypto::{KeyPair, PasskeyPair};
use compass_account::account::hooks::value_cap_init;
use compass_account::account::modules::VALUE_CAP_HOOK;
use compass_account::error::{
    AccountError, AuthorizationError, ErrorKind, InvariantViolation, ValidationFailure,
};

const NOW: u64 = 1_700_000_000;
const ORIGIN: &str = "https://wallet.compass.local";
const CREDENTIAL_DELAY: u64 = 2 * 24 * 60 * 60;
const RECOVERY_DELAY: u64 = 3 * 24 * 60 * 60;

fn account_address() -> Address {
    Address([0xc0; 20])
}

fn deploy(primary: &KeyPair, second_factor: Option<&PasskeyPair>, dual_factor: bool) -> Account {
    let mut account = Account::new(account_address(), &TimelockConfig::default());
    account
        .deploy(&init_payload(primary, second_factor, dual_factor), NOW)
        .unwrap();
    account.take_events();
    account
}

fn init_payload(primary: &KeyPair, second_factor: Option<&PasskeyPair>, dual_factor: bool) -> Vec<u8> {
    InitParams {
        primary: primary.address(),
        second_factor: second_factor.map(|p| p.public_key()),
        dual_factor,
    }
    .encode(H256([7; 32]))
}

fn request(account: &Account, action: Action) -> Request {
    Request::new(account.address(), account.nonce(), action)
}

fn single(request: Request, primary: &KeyPair) -> Request {
    let sig = primary.sign_hash(&request.action_hash()).unwrap();
    request.with_credential(with_validator_prefix(*MFA_VALIDATOR, &sig))
}

fn dual(request: Request, primary: &KeyPair, passkey: &PasskeyPair) -> Request {
    let hash = request.action_hash();
    let inner = DualFactorCredential {
        assertion: passkey.assert(&hash.0, ORIGIN),
        second_factor_id: passkey.public_key().id(),
        primary_signature: primary.sign_hash(&hash).unwrap(),
    }
    .encode()
    .unwrap();
    request.with_credential(with_validator_prefix(*MFA_VALIDATOR, &inner))
}

fn scoped(request: Request, delegate: &KeyPair) -> Request {
    let inner = ScopedCredential {
        delegate: delegate.address(),
        signature: delegate.sign_hash(&request.action_hash()).unwrap(),
    }
    .encode();
    request.with_credential(with_validator_prefix(*SCOPED_VALIDATOR, &inner))
}

fn admin(account: &mut Account, primary: &KeyPair, call: AdminCall, now: u64) -> AdminOutcome {
    let req = single(request(account, Action::Admin(call)), primary);
    account.handle(req, now).unwrap().admin.unwrap()
}

fn transfer(value: u128) -> Action {
    Action::Call(Call::new(Address([0x42; 20]), value, vec![]))
}

/// Guardians 0x02 and 0x03 join the primary; `threshold` of the three must approve.
fn with_guardians(account: &mut Account, primary: &KeyPair, threshold: u32) -> (Address, Address) {
    let guardian2 = Address([0x02; 20]);
    let guardian3 = Address([0x03; 20]);
    admin(account, primary, AdminCall::AddGuardian(guardian2), NOW);
    admin(account, primary, AdminCall::AddGuardian(guardian3), NOW);
    admin(account, primary, AdminCall::SetGuardianThreshold(threshold), NOW);
    (guardian2, guardian3)
}

fn rotate_primary_params() -> RecoveryParams {
    RecoveryParams {
        new_secondary_key: None,
        new_primary: Some(Address([0x99; 20])),
    }
}

#[test]
fn test_single_factor_signature_length_gate() {
    let primary = KeyPair::generate();
    let mut account = deploy(&primary, None, false);

    let req = request(&account, transfer(1));
    let sig = primary.sign_hash(&req.action_hash()).unwrap();
    let truncated = req
        .clone()
        .with_credential(with_validator_prefix(*MFA_VALIDATOR, &sig[..64]));
    let err = account.handle(truncated, NOW).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(account.nonce(), 0);

    let receipt = account
        .handle(req.with_credential(with_validator_prefix(*MFA_VALIDATOR, &sig)), NOW)
        .unwrap();
    assert_eq!(receipt.calls.len(), 1);
    assert_eq!(account.nonce(), 1);
}

#[test]
fn test_second_factor_optional_until_enforced() {
    let primary = KeyPair::generate();
    let passkey = PasskeyPair::generate();
    let mut account = deploy(&primary, None, false);

    admin(
        &mut account,
        &primary,
        AdminCall::AddCredential {
            key: passkey.public_key(),
            tag: "laptop".into(),
        },
        NOW,
    );
    assert_eq!(account.registry().active_count(), 1);
    assert!(!account.registry().dual_factor_enabled());

    let req = single(request(&account, transfer(2)), &primary);
    account.handle(req, NOW).unwrap();
}

#[test]
fn test_enforced_second_factor() {
    let primary = KeyPair::generate();
    let passkey = PasskeyPair::generate();
    let mut account = deploy(&primary, Some(&passkey), false);

    assert_eq!(
        admin(&mut account, &primary, AdminCall::EnableDualFactor, NOW),
        AdminOutcome::Applied
    );
    assert!(account.registry().dual_factor_enabled());

    let primary_only = single(request(&account, transfer(3)), &primary);
    let err = account.handle(primary_only, NOW).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let stranger = PasskeyPair::generate();
    let wrong_key = dual(request(&account, transfer(3)), &primary, &stranger);
    assert_eq!(
        account.handle(wrong_key, NOW),
        Err(ValidationFailure::UnknownSecondFactor(stranger.public_key().id()).into())
    );

    let impostor = KeyPair::generate();
    let wrong_primary = dual(request(&account, transfer(3)), &impostor, &passkey);
    assert_eq!(
        account.handle(wrong_primary, NOW),
        Err(ValidationFailure::PrimarySignatureMismatch.into())
    );

    let both = dual(request(&account, transfer(3)), &primary, &passkey);
    let receipt = account.handle(both, NOW).unwrap();
    assert_eq!(receipt.authorized_by, primary.address());
    assert_eq!(account.nonce(), 2);
}

#[test]
fn test_assertion_bound_to_other_action_is_rejected() {
    let primary = KeyPair::generate();
    let passkey = PasskeyPair::generate();
    let mut account = deploy(&primary, Some(&passkey), true);

    let req = request(&account, transfer(4));
    let hash = req.action_hash();
    let other = request(&account, transfer(5)).action_hash();
    let inner = DualFactorCredential {
        assertion: passkey.assert(&other.0, ORIGIN),
        second_factor_id: passkey.public_key().id(),
        primary_signature: primary.sign_hash(&hash).unwrap(),
    }
    .encode()
    .unwrap();
    let req = req.with_credential(with_validator_prefix(*MFA_VALIDATOR, &inner));
    assert_eq!(
        account.handle(req, NOW),
        Err(ValidationFailure::SecondFactorMismatch.into())
    );
}

#[test]
fn test_guardian_recovery_two_of_three() {
    let primary = KeyPair::generate();
    let old_passkey = PasskeyPair::generate();
    let mut account = deploy(&primary, Some(&old_passkey), true);

    let guardian2 = Address([0x02; 20]);
    let guardian3 = Address([0x03; 20]);
    for call in [
        AdminCall::AddGuardian(guardian2),
        AdminCall::AddGuardian(guardian3),
        AdminCall::SetGuardianThreshold(2),
    ] {
        let req = dual(request(&account, Action::Admin(call)), &primary, &old_passkey);
        account.handle(req, NOW).unwrap();
    }
    assert_eq!(account.guardians().unwrap().len(), 3);
    assert_eq!(account.guardians().unwrap().threshold(), 2);

    let new_primary = KeyPair::generate();
    let new_passkey = PasskeyPair::generate();
    let params = RecoveryParams {
        new_secondary_key: Some(new_passkey.public_key()),
        new_primary: Some(new_primary.address()),
    };
    let id = account.initiate_recovery(primary.address(), params, NOW).unwrap();
    assert_eq!(
        account.recoveries().get(&id).unwrap().status(account.guardians().unwrap(), NOW),
        RecoveryStatus::Approving
    );
    assert!(matches!(
        account.execute_recovery(id, NOW + RECOVERY_DELAY),
        Err(AccountError::Authorization(AuthorizationError::ThresholdNotMet { .. }))
    ));

    let matures_at = account.approve_recovery(guardian2, id, NOW + 10).unwrap();
    assert_eq!(matures_at, Some(NOW + 10 + RECOVERY_DELAY));
    assert_eq!(
        account
            .recoveries()
            .get(&id)
            .unwrap()
            .status(account.guardians().unwrap(), NOW + 10),
        RecoveryStatus::ThresholdMet
    );
    assert!(matches!(
        account.execute_recovery(id, NOW + 10 + RECOVERY_DELAY - 1),
        Err(AccountError::Authorization(AuthorizationError::NotMatured { .. }))
    ));

    account.execute_recovery(id, NOW + 10 + RECOVERY_DELAY).unwrap();
    assert!(!account
        .registry()
        .credential(&old_passkey.public_key().id())
        .unwrap()
        .active);
    assert_eq!(account.registry().active_count(), 1);
    assert_eq!(account.registry().primary(), Some(new_primary.address()));

    let later = NOW + 10 + RECOVERY_DELAY + 1;
    let old = dual(request(&account, transfer(1)), &primary, &old_passkey);
    assert!(account.handle(old, later).is_err());
    let new = dual(request(&account, transfer(1)), &new_primary, &new_passkey);
    account.handle(new, later).unwrap();
}

#[test]
fn test_recovery_cancelled_by_owner() {
    let primary = KeyPair::generate();
    let mut account = deploy(&primary, None, false);
    let params = RecoveryParams {
        new_secondary_key: None,
        new_primary: Some(Address([0x99; 20])),
    };
    let id = account.initiate_recovery(primary.address(), params, NOW).unwrap();
    admin(&mut account, &primary, AdminCall::CancelRecovery(id), NOW + 1);
    assert_eq!(
        account.execute_recovery(id, NOW + RECOVERY_DELAY),
        Err(AuthorizationError::AlreadyCancelled(id).into())
    );
    assert!(account.crank(NOW + RECOVERY_DELAY).executed.is_empty());
}

#[test]
fn test_last_validator_is_never_removed() {
    let primary = KeyPair::generate();
    let mut account = deploy(&primary, None, false);

    let uninstall = |account: &Account, module: Address| {
        request(
            account,
            Action::Admin(AdminCall::UninstallModule {
                kind: ModuleKind::Validator,
                module,
                deinit: vec![],
            }),
        )
    };

    let req = single(uninstall(&account, *MFA_VALIDATOR), &primary);
    assert_eq!(
        account.handle(req, NOW),
        Err(InvariantViolation::LastValidator.into())
    );
    assert_eq!(account.nonce(), 0);

    admin(
        &mut account,
        &primary,
        AdminCall::InstallModule {
            kind: ModuleKind::Validator,
            module: *SCOPED_VALIDATOR,
            init: vec![],
        },
        NOW,
    );
    // Scoped delegates cannot administer, so MFA stays while it is installed.
    let req = single(uninstall(&account, *MFA_VALIDATOR), &primary);
    assert_eq!(
        account.handle(req, NOW),
        Err(InvariantViolation::LastValidator.into())
    );
    assert_eq!(account.modules().validator_count(), 2);

    let req = single(uninstall(&account, *SCOPED_VALIDATOR), &primary);
    account.handle(req, NOW).unwrap();
    let req = single(uninstall(&account, *MFA_VALIDATOR), &primary);
    assert_eq!(
        account.handle(req, NOW),
        Err(InvariantViolation::LastValidator.into())
    );
    assert_eq!(account.modules().validator_count(), 1);
}

#[test]
fn test_counterfactual_first_request_instantiates() {
    let primary = KeyPair::generate();
    let passkey = PasskeyPair::generate();
    let mut account = Account::new(account_address(), &TimelockConfig::default());
    let payload = init_payload(&primary, Some(&passkey), true);

    let bare = single(request(&account, transfer(1)), &primary);
    assert_eq!(
        account.handle(bare, NOW),
        Err(ValidationFailure::NotDeployed.into())
    );

    let req = dual(
        request(&account, transfer(1)).with_init_payload(payload.clone()),
        &primary,
        &passkey,
    );
    let receipt = account.handle(req, NOW).unwrap();
    assert_eq!(receipt.calls.len(), 1);
    assert!(account.is_deployed());
    assert!(account.registry().dual_factor_enabled());
    assert_eq!(account.nonce(), 1);
    let events: Vec<_> = account.take_events().iter().map(|e| e.name()).collect();
    assert!(events.contains(&"account-initialized"));

    let again = dual(
        request(&account, transfer(1)).with_init_payload(payload),
        &primary,
        &passkey,
    );
    assert_eq!(
        account.handle(again, NOW),
        Err(ValidationFailure::AlreadyDeployed.into())
    );
}

#[test]
fn test_counterfactual_bad_signature_leaves_account_undeployed() {
    let primary = KeyPair::generate();
    let mut account = Account::new(account_address(), &TimelockConfig::default());
    let req = single(
        request(&account, transfer(1)).with_init_payload(init_payload(&primary, None, false)),
        &KeyPair::generate(),
    );
    assert_eq!(
        account.handle(req, NOW),
        Err(ValidationFailure::PrimarySignatureMismatch.into())
    );
    assert!(!account.is_deployed());
    assert!(account.take_events().is_empty());
}

#[test]
fn test_scoped_session_through_dispatcher() {
    let primary = KeyPair::generate();
    let delegate = KeyPair::generate();
    let mut account = deploy(&primary, None, false);
    let target = Address([0x42; 20]);

    admin(
        &mut account,
        &primary,
        AdminCall::InstallModule {
            kind: ModuleKind::Validator,
            module: *SCOPED_VALIDATOR,
            init: vec![],
        },
        NOW,
    );
    let grant = ScopedGrant::new(delegate.address(), NOW, NOW + 3_600)
        .with_targets(vec![target])
        .with_limits(50, 80);
    admin(&mut account, &primary, AdminCall::GrantSession(grant), NOW);

    let req = scoped(request(&account, transfer(50)), &delegate);
    let receipt = account.handle(req, NOW + 1).unwrap();
    assert_eq!(receipt.authorized_by, delegate.address());

    let req = scoped(request(&account, transfer(51)), &delegate);
    assert_eq!(
        account.handle(req, NOW + 2),
        Err(AuthorizationError::PerActionLimitExceeded { value: 51, limit: 50 }.into())
    );

    let req = scoped(request(&account, transfer(31)), &delegate);
    assert_eq!(
        account.handle(req, NOW + 3),
        Err(AuthorizationError::TotalLimitExceeded {
            attempted: 81,
            limit: 80
        }
        .into())
    );
    assert_eq!(account.registry().grant(&delegate.address()).unwrap().spent_total, 50);

    let other_target = Action::Call(Call::new(Address([0x43; 20]), 1, vec![]));
    let req = scoped(request(&account, other_target), &delegate);
    assert_eq!(
        account.handle(req, NOW + 4),
        Err(AuthorizationError::TargetNotAllowed(Address([0x43; 20])).into())
    );

    let req = scoped(
        request(&account, Action::Admin(AdminCall::AddGuardian(delegate.address()))),
        &delegate,
    );
    assert_eq!(
        account.handle(req, NOW + 5),
        Err(AuthorizationError::AdminNotAllowed.into())
    );

    let req = scoped(request(&account, transfer(1)), &delegate);
    assert!(matches!(
        account.handle(req, NOW + 3_601),
        Err(AccountError::Authorization(AuthorizationError::GrantOutsideWindow { .. }))
    ));

    admin(
        &mut account,
        &primary,
        AdminCall::RevokeSession(delegate.address()),
        NOW + 6,
    );
    let req = scoped(request(&account, transfer(1)), &delegate);
    assert_eq!(
        account.handle(req, NOW + 7),
        Err(AuthorizationError::UnknownGrant(delegate.address()).into())
    );
}

#[test]
fn test_timelocked_primary_rotation() {
    let primary = KeyPair::generate();
    let successor = KeyPair::generate();
    let mut account = deploy(&primary, None, false);

    let outcome = admin(
        &mut account,
        &primary,
        AdminCall::ProposeChange(CredentialChange::RotatePrimary(successor.address())),
        NOW,
    );
    let action = match outcome {
        AdminOutcome::Scheduled { action, matures_at } => {
            assert_eq!(matures_at, NOW + CREDENTIAL_DELAY);
            action
        }
        other => panic!("expected scheduled rotation, got {:?}", other),
    };

    assert!(matches!(
        account.execute_change(action, NOW + CREDENTIAL_DELAY - 1),
        Err(AccountError::Authorization(AuthorizationError::NotMatured { .. }))
    ));
    assert_eq!(account.registry().primary(), Some(primary.address()));

    let report = account.crank(NOW + CREDENTIAL_DELAY);
    assert_eq!(report.executed, vec![("credential-change", action)]);
    assert_eq!(account.registry().primary(), Some(successor.address()));
    assert_eq!(
        account.execute_change(action, NOW + CREDENTIAL_DELAY),
        Err(AuthorizationError::AlreadyExecuted(action).into())
    );

    let old = single(request(&account, transfer(1)), &primary);
    assert!(account.handle(old, NOW + CREDENTIAL_DELAY).is_err());
    let new = single(request(&account, transfer(1)), &successor);
    account.handle(new, NOW + CREDENTIAL_DELAY).unwrap();
}

#[test]
fn test_cancelled_removal_never_executes() {
    let primary = KeyPair::generate();
    let passkey = PasskeyPair::generate();
    let mut account = deploy(&primary, Some(&passkey), false);
    let id = passkey.public_key().id();

    let action = match admin(
        &mut account,
        &primary,
        AdminCall::ProposeChange(CredentialChange::RemoveCredential(id)),
        NOW,
    ) {
        AdminOutcome::Scheduled { action, .. } => action,
        other => panic!("expected scheduled removal, got {:?}", other),
    };
    admin(&mut account, &primary, AdminCall::CancelChange(action), NOW + 5);
    assert_eq!(
        account.execute_change(action, NOW + CREDENTIAL_DELAY),
        Err(AuthorizationError::AlreadyCancelled(action).into())
    );
    assert!(account.registry().active_credential(&id).is_some());
}

#[test]
fn test_wrong_account_rejected() {
    let primary = KeyPair::generate();
    let mut account = deploy(&primary, None, false);
    let req = single(
        Request::new(Address([0xdd; 20]), 0, transfer(1)),
        &primary,
    );
    assert!(matches!(
        account.handle(req, NOW),
        Err(AccountError::Validation(ValidationFailure::WrongAccount { .. }))
    ));
}

#[test]
fn test_two_step_path_is_atomic() {
    let primary = KeyPair::generate();
    let delegate = KeyPair::generate();
    let mut account = deploy(&primary, None, false);
    admin(
        &mut account,
        &primary,
        AdminCall::InstallModule {
            kind: ModuleKind::Validator,
            module: *SCOPED_VALIDATOR,
            init: vec![],
        },
        NOW,
    );
    let grant = ScopedGrant::new(delegate.address(), 0, 0).with_limits(0, 100);
    admin(&mut account, &primary, AdminCall::GrantSession(grant), NOW);
    admin(
        &mut account,
        &primary,
        AdminCall::InstallModule {
            kind: ModuleKind::Hook,
            module: *VALUE_CAP_HOOK,
            init: value_cap_init(10, 3_600, false),
        },
        NOW,
    );
    account.take_events();
    let nonce = account.nonce();

    let authorized = account
        .authorize(scoped(request(&account, transfer(50)), &delegate), NOW + 1)
        .unwrap();
    assert_eq!(authorized.signer(), delegate.address());
    assert_eq!(account.nonce(), nonce);

    let err = account.execute(authorized, NOW + 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(account.nonce(), nonce);
    assert_eq!(account.registry().grant(&delegate.address()).unwrap().spent_total, 0);
    assert!(account.take_events().is_empty());

    let authorized = account
        .authorize(scoped(request(&account, transfer(10)), &delegate), NOW + 2)
        .unwrap();
    let receipt = account.execute(authorized, NOW + 2).unwrap();
    assert_eq!(receipt.authorized_by, delegate.address());
    assert_eq!(account.nonce(), nonce + 1);
    assert_eq!(account.registry().grant(&delegate.address()).unwrap().spent_total, 10);
}

#[test]
fn test_lowered_threshold_matures_after_fresh_delay() {
    let primary = KeyPair::generate();
    let mut account = deploy(&primary, None, false);
    let (guardian2, _) = with_guardians(&mut account, &primary, 3);

    let id = account
        .initiate_recovery(primary.address(), rotate_primary_params(), NOW)
        .unwrap();
    assert_eq!(account.approve_recovery(guardian2, id, NOW + 1).unwrap(), None);

    let lowered_at = NOW + 100;
    admin(&mut account, &primary, AdminCall::SetGuardianThreshold(2), lowered_at);
    let request = account.recoveries().get(&id).unwrap();
    assert_eq!(request.matures_at, Some(lowered_at + RECOVERY_DELAY));
    assert_eq!(
        request.status(account.guardians().unwrap(), lowered_at),
        RecoveryStatus::ThresholdMet
    );

    assert!(matches!(
        account.execute_recovery(id, lowered_at + RECOVERY_DELAY - 1),
        Err(AccountError::Authorization(AuthorizationError::NotMatured { .. }))
    ));
    account.execute_recovery(id, lowered_at + RECOVERY_DELAY).unwrap();
    assert_eq!(account.registry().primary(), Some(Address([0x99; 20])));
}

#[test]
fn test_regained_weight_needs_fresh_delay() {
    let primary = KeyPair::generate();
    let mut account = deploy(&primary, None, false);
    let (guardian2, guardian3) = with_guardians(&mut account, &primary, 2);

    let id = account
        .initiate_recovery(primary.address(), rotate_primary_params(), NOW)
        .unwrap();
    assert_eq!(
        account.approve_recovery(guardian2, id, NOW).unwrap(),
        Some(NOW + RECOVERY_DELAY)
    );

    admin(&mut account, &primary, AdminCall::RemoveGuardian(guardian2), NOW + 1);
    assert_eq!(account.recoveries().get(&id).unwrap().matures_at, None);
    assert!(matches!(
        account.execute_recovery(id, NOW + RECOVERY_DELAY),
        Err(AccountError::Authorization(AuthorizationError::ThresholdNotMet { .. }))
    ));

    let regained_at = NOW + 2 * RECOVERY_DELAY;
    assert_eq!(
        account.approve_recovery(guardian3, id, regained_at).unwrap(),
        Some(regained_at + RECOVERY_DELAY)
    );
    assert!(matches!(
        account.execute_recovery(id, regained_at),
        Err(AccountError::Authorization(AuthorizationError::NotMatured { .. }))
    ));
    account.execute_recovery(id, regained_at + RECOVERY_DELAY).unwrap();
}

#[test]
fn test_recovery_requires_current_guardian_sender() {
    let primary = KeyPair::generate();
    let mut account = deploy(&primary, None, false);
    let stranger = Address([0x5e; 20]);

    assert_eq!(
        account.initiate_recovery(stranger, rotate_primary_params(), NOW),
        Err(AuthorizationError::NotGuardian(stranger).into())
    );
    let (guardian2, _) = with_guardians(&mut account, &primary, 2);
    let id = account
        .initiate_recovery(guardian2, rotate_primary_params(), NOW)
        .unwrap();
    assert_eq!(
        account.approve_recovery(stranger, id, NOW),
        Err(AuthorizationError::NotGuardian(stranger).into())
    );
    assert_eq!(account.recoveries().get(&id).unwrap().approvals.len(), 1);
}
