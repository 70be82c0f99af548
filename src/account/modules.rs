//! Module lifecycle: validators, executors, the hook slot and fallback
//! handlers.
//!
//! Validators and hooks carry code, so only identities from the built-in
//! directory can be installed. Executors and fallback handlers are plain
//! addresses the host trusts.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::hooks::Hook;
use super::types::Address;
use crate::encoding::CanonicalEncode;
use crate::error::{AccountError, InvariantViolation, Result, ValidationFailure};

pub const MFA_VALIDATOR_LABEL: &str = "compass.validator.mfa";
pub const SCOPED_VALIDATOR_LABEL: &str = "compass.validator.scoped";
pub const VALUE_CAP_HOOK_LABEL: &str = "compass.hook.value-cap";
pub const TARGET_GUARD_HOOK_LABEL: &str = "compass.hook.target-guard";
pub const FANOUT_HOOK_LABEL: &str = "compass.hook.fanout";

lazy_static! {
    pub static ref MFA_VALIDATOR: Address = Address::from_label(MFA_VALIDATOR_LABEL);
    pub static ref SCOPED_VALIDATOR: Address = Address::from_label(SCOPED_VALIDATOR_LABEL);
    pub static ref VALUE_CAP_HOOK: Address = Address::from_label(VALUE_CAP_HOOK_LABEL);
    pub static ref TARGET_GUARD_HOOK: Address = Address::from_label(TARGET_GUARD_HOOK_LABEL);
    pub static ref FANOUT_HOOK: Address = Address::from_label(FANOUT_HOOK_LABEL);
    static ref DIRECTORY: HashMap<Address, BuiltinModule> = {
        let mut m = HashMap::new();
        m.insert(*MFA_VALIDATOR, BuiltinModule::Validator(ValidatorKind::MultiFactor));
        m.insert(*SCOPED_VALIDATOR, BuiltinModule::Validator(ValidatorKind::ScopedDelegation));
        m.insert(*VALUE_CAP_HOOK, BuiltinModule::Hook(HookKind::ValueCap));
        m.insert(*TARGET_GUARD_HOOK, BuiltinModule::Hook(HookKind::TargetGuard));
        m.insert(*FANOUT_HOOK, BuiltinModule::Hook(HookKind::Fanout));
        m
    };
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Validator,
    Executor,
    FallbackHandler,
    Hook,
}

impl ModuleKind {
    fn tag(self) -> u8 {
        match self {
            ModuleKind::Validator => 1,
            ModuleKind::Executor => 2,
            ModuleKind::FallbackHandler => 3,
            ModuleKind::Hook => 4,
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleKind::Validator => "validator",
            ModuleKind::Executor => "executor",
            ModuleKind::FallbackHandler => "fallback-handler",
            ModuleKind::Hook => "hook",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "validator" => Ok(ModuleKind::Validator),
            "executor" => Ok(ModuleKind::Executor),
            "fallback-handler" | "fallback" => Ok(ModuleKind::FallbackHandler),
            "hook" => Ok(ModuleKind::Hook),
            other => Err(format!("unknown module kind '{}'", other)),
        }
    }
}

impl CanonicalEncode for ModuleKind {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
    }
}

/// The closed set of validator implementations.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidatorKind {
    MultiFactor,
    ScopedDelegation,
}

impl ValidatorKind {
    /// Whether credentials checked by this validator may run administrative
    /// actions. Scoped delegates never can.
    pub fn authorizes_admin(&self) -> bool {
        matches!(self, ValidatorKind::MultiFactor)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookKind {
    ValueCap,
    TargetGuard,
    Fanout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinModule {
    Validator(ValidatorKind),
    Hook(HookKind),
}

/// Look up a built-in module by identity.
pub fn builtin(module: &Address) -> Option<BuiltinModule> {
    DIRECTORY.get(module).copied()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InstalledHook {
    pub module: Address,
    pub hook: Hook,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleRegistry {
    validators: HashMap<Address, ValidatorKind>,
    executors: HashSet<Address>,
    hook: Option<InstalledHook>,
    fallbacks: HashMap<[u8; 4], Address>,
}

impl ModuleRegistry {
    /// Registry of a freshly instantiated account: the MFA validator only.
    pub fn with_mfa_validator() -> Self {
        let mut registry = Self::default();
        registry
            .validators
            .insert(*MFA_VALIDATOR, ValidatorKind::MultiFactor);
        registry
    }

    pub fn validator(&self, module: &Address) -> Option<ValidatorKind> {
        self.validators.get(module).copied()
    }

    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    /// Installed validators in address order.
    pub fn validators(&self) -> Vec<Address> {
        let mut out: Vec<Address> = self.validators.keys().copied().collect();
        out.sort();
        out
    }

    pub fn is_executor(&self, module: &Address) -> bool {
        self.executors.contains(module)
    }

    pub fn executors(&self) -> Vec<Address> {
        let mut out: Vec<Address> = self.executors.iter().copied().collect();
        out.sort();
        out
    }

    pub fn hook(&self) -> Option<&InstalledHook> {
        self.hook.as_ref()
    }

    pub fn hook_mut(&mut self) -> Option<&mut InstalledHook> {
        self.hook.as_mut()
    }

    pub fn fallback_handler(&self, selector: &[u8; 4]) -> Option<Address> {
        self.fallbacks.get(selector).copied()
    }

    pub fn fallbacks(&self) -> Vec<([u8; 4], Address)> {
        let mut out: Vec<([u8; 4], Address)> =
            self.fallbacks.iter().map(|(s, a)| (*s, *a)).collect();
        out.sort();
        out
    }

    pub fn install(&mut self, kind: ModuleKind, module: Address, init: &[u8]) -> Result<()> {
        if module.is_zero() {
            return Err(InvariantViolation::ZeroAddress("module").into());
        }
        match kind {
            ModuleKind::Validator => {
                let validator = match builtin(&module) {
                    Some(BuiltinModule::Validator(v)) => v,
                    _ => return Err(ValidationFailure::UnknownModule(module).into()),
                };
                if !init.is_empty() {
                    return Err(ValidationFailure::MalformedInitPayload(
                        "validators take no init payload".into(),
                    )
                    .into());
                }
                if self.validators.contains_key(&module) {
                    return Err(InvariantViolation::ModuleAlreadyInstalled(module).into());
                }
                self.validators.insert(module, validator);
            }
            ModuleKind::Executor => {
                if !self.executors.insert(module) {
                    return Err(InvariantViolation::ModuleAlreadyInstalled(module).into());
                }
            }
            ModuleKind::FallbackHandler => {
                let selector = selector_payload(init)?;
                if let Some(existing) = self.fallbacks.get(&selector) {
                    return Err(InvariantViolation::ModuleAlreadyInstalled(*existing).into());
                }
                self.fallbacks.insert(selector, module);
            }
            ModuleKind::Hook => {
                let hook_kind = match builtin(&module) {
                    Some(BuiltinModule::Hook(h)) => h,
                    _ => return Err(ValidationFailure::UnknownModule(module).into()),
                };
                if let Some(current) = &self.hook {
                    return Err(InvariantViolation::HookSlotOccupied(current.module).into());
                }
                let hook = Hook::from_init(hook_kind, init)?;
                self.hook = Some(InstalledHook { module, hook });
            }
        }
        Ok(())
    }

    /// Remove a validator, executor or fallback handler. Hooks go through
    /// [`ModuleRegistry::remove_hook`] because their removal may be timelocked.
    pub fn uninstall(&mut self, kind: ModuleKind, module: Address, deinit: &[u8]) -> Result<()> {
        match kind {
            ModuleKind::Validator => {
                if !self.validators.contains_key(&module) {
                    return Err(InvariantViolation::ModuleNotInstalled(module).into());
                }
                // The account must keep a validator that can administer it,
                // or nothing could ever reinstall one.
                let admin_left = self
                    .validators
                    .iter()
                    .any(|(other, kind)| *other != module && kind.authorizes_admin());
                if !admin_left {
                    return Err(InvariantViolation::LastValidator.into());
                }
                self.validators.remove(&module);
            }
            ModuleKind::Executor => {
                if !self.executors.remove(&module) {
                    return Err(InvariantViolation::ModuleNotInstalled(module).into());
                }
            }
            ModuleKind::FallbackHandler => {
                let selector = selector_payload(deinit)?;
                if self.fallbacks.get(&selector) != Some(&module) {
                    return Err(InvariantViolation::ModuleNotInstalled(module).into());
                }
                self.fallbacks.remove(&selector);
            }
            ModuleKind::Hook => {
                self.remove_hook(module)?;
            }
        }
        Ok(())
    }

    pub fn remove_hook(&mut self, module: Address) -> Result<InstalledHook> {
        match self.hook.take() {
            Some(installed) if installed.module == module => Ok(installed),
            other => {
                self.hook = other;
                Err(InvariantViolation::ModuleNotInstalled(module).into())
            }
        }
    }
}

fn selector_payload(payload: &[u8]) -> Result<[u8; 4]> {
    <[u8; 4]>::try_from(payload).map_err(|_| {
        AccountError::from(ValidationFailure::MalformedInitPayload(format!(
            "fallback handler payload must be a 4-byte selector, got {} bytes",
            payload.len()
        )))
    })
}
