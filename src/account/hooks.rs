//! Built-in execution hooks.
//!
//! A hook sees every call an authorized action asks the host to perform,
//! once before (`pre_check`, may reject) and once after (`post_check`,
//! records state). Init payloads are fixed-width big-endian fields.

use serde::{Deserialize, Serialize};

use super::modules::{builtin, BuiltinModule, HookKind};
use super::types::{Address, Call, Timestamp};
use crate::error::{AuthorizationError, InvariantViolation, Result, ValidationFailure};

/// What a hook is shown about the action being executed.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub calls: &'a [Call],
    pub value: u128,
    pub now: Timestamp,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ValueCap {
    pub limit: u128,
    pub window_secs: u64,
    pub protective: bool,
    pub window_start: Timestamp,
    pub spent_in_window: u128,
}

impl ValueCap {
    const INIT_LEN: usize = 16 + 8 + 1;

    fn spent_at(&self, now: Timestamp) -> u128 {
        if now >= self.window_start.saturating_add(self.window_secs) {
            0
        } else {
            self.spent_in_window
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TargetGuard {
    pub protective: bool,
    pub denied: Vec<Address>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Hook {
    ValueCap(ValueCap),
    TargetGuard(TargetGuard),
    Fanout(Vec<(Address, Hook)>),
}

impl Hook {
    /// Build a hook from its install payload.
    pub fn from_init(kind: HookKind, init: &[u8]) -> Result<Self> {
        match kind {
            HookKind::ValueCap => {
                if init.len() != ValueCap::INIT_LEN {
                    return Err(bad_init(format!(
                        "value cap init must be {} bytes, got {}",
                        ValueCap::INIT_LEN,
                        init.len()
                    )));
                }
                let mut limit = [0u8; 16];
                limit.copy_from_slice(&init[..16]);
                let mut window = [0u8; 8];
                window.copy_from_slice(&init[16..24]);
                let window_secs = u64::from_be_bytes(window);
                if window_secs == 0 {
                    return Err(bad_init("value cap window must be non-zero".into()));
                }
                Ok(Hook::ValueCap(ValueCap {
                    limit: u128::from_be_bytes(limit),
                    window_secs,
                    protective: flag(init[24])?,
                    window_start: 0,
                    spent_in_window: 0,
                }))
            }
            HookKind::TargetGuard => {
                let (first, rest) = init
                    .split_first()
                    .ok_or_else(|| bad_init("target guard init is empty".into()))?;
                if rest.len() % 20 != 0 {
                    return Err(bad_init("target list is not a multiple of 20 bytes".into()));
                }
                let denied = rest
                    .chunks_exact(20)
                    .filter_map(Address::from_slice)
                    .collect();
                Ok(Hook::TargetGuard(TargetGuard {
                    protective: flag(*first)?,
                    denied,
                }))
            }
            HookKind::Fanout => {
                let mut children = Vec::new();
                let mut rest = init;
                while !rest.is_empty() {
                    if rest.len() < 22 {
                        return Err(bad_init("truncated fanout entry".into()));
                    }
                    let module = Address::from_slice(&rest[..20])
                        .ok_or_else(|| bad_init("fanout module".into()))?;
                    let len = u16::from_be_bytes([rest[20], rest[21]]) as usize;
                    let body = rest
                        .get(22..22 + len)
                        .ok_or_else(|| bad_init("fanout child init overruns payload".into()))?;
                    let child_kind = match builtin(&module) {
                        Some(BuiltinModule::Hook(HookKind::Fanout)) => {
                            return Err(bad_init("fanout hooks do not nest".into()))
                        }
                        Some(BuiltinModule::Hook(kind)) => kind,
                        _ => return Err(ValidationFailure::UnknownModule(module).into()),
                    };
                    children.push((module, Hook::from_init(child_kind, body)?));
                    rest = &rest[22 + len..];
                }
                if children.is_empty() {
                    return Err(bad_init("fanout needs at least one child".into()));
                }
                Ok(Hook::Fanout(children))
            }
        }
    }

    /// Protective hooks can only be removed through the hook-removal timelock.
    pub fn is_protective(&self) -> bool {
        match self {
            Hook::ValueCap(cap) => cap.protective,
            Hook::TargetGuard(guard) => guard.protective,
            Hook::Fanout(children) => children.iter().any(|(_, h)| h.is_protective()),
        }
    }

    pub fn pre_check(&self, ctx: &HookContext<'_>) -> Result<()> {
        match self {
            Hook::ValueCap(cap) => {
                let attempted = cap
                    .spent_at(ctx.now)
                    .checked_add(ctx.value)
                    .ok_or(InvariantViolation::Overflow("hook window spend"))?;
                if attempted > cap.limit {
                    return Err(AuthorizationError::HookRejected(format!(
                        "value {} exceeds window cap {}",
                        attempted, cap.limit
                    ))
                    .into());
                }
                Ok(())
            }
            Hook::TargetGuard(guard) => {
                match ctx.calls.iter().find(|c| guard.denied.contains(&c.target)) {
                    Some(call) => Err(AuthorizationError::HookRejected(format!(
                        "target {} is denied",
                        call.target
                    ))
                    .into()),
                    None => Ok(()),
                }
            }
            Hook::Fanout(children) => children.iter().try_for_each(|(_, h)| h.pre_check(ctx)),
        }
    }

    pub fn post_check(&mut self, ctx: &HookContext<'_>) -> Result<()> {
        match self {
            Hook::ValueCap(cap) => {
                if ctx.now >= cap.window_start.saturating_add(cap.window_secs) {
                    cap.window_start = ctx.now;
                    cap.spent_in_window = 0;
                }
                cap.spent_in_window = cap
                    .spent_in_window
                    .checked_add(ctx.value)
                    .ok_or(InvariantViolation::Overflow("hook window spend"))?;
                Ok(())
            }
            Hook::TargetGuard(_) => Ok(()),
            Hook::Fanout(children) => children
                .iter_mut()
                .try_for_each(|(_, h)| h.post_check(ctx)),
        }
    }
}

/// Install payload for the value cap hook.
pub fn value_cap_init(limit: u128, window_secs: u64, protective: bool) -> Vec<u8> {
    let mut init = Vec::with_capacity(ValueCap::INIT_LEN);
    init.extend_from_slice(&limit.to_be_bytes());
    init.extend_from_slice(&window_secs.to_be_bytes());
    init.push(u8::from(protective));
    init
}

pub fn target_guard_init(protective: bool, denied: &[Address]) -> Vec<u8> {
    let mut init = vec![u8::from(protective)];
    for target in denied {
        init.extend_from_slice(&target.0);
    }
    init
}

/// Each child body is length-prefixed with two bytes, so a body longer
/// than `u16::MAX` is refused.
pub fn fanout_init(children: &[(Address, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut init = Vec::new();
    for (module, body) in children {
        let len = u16::try_from(body.len()).map_err(|_| {
            ValidationFailure::InvalidParameter(format!(
                "hook {} init of {} bytes exceeds the two-byte length prefix",
                module,
                body.len()
            ))
        })?;
        init.extend_from_slice(&module.0);
        init.extend_from_slice(&len.to_be_bytes());
        init.extend_from_slice(body);
    }
    Ok(init)
}

fn flag(byte: u8) -> Result<bool> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(bad_init(format!("protective flag {}", other))),
    }
}

fn bad_init(reason: String) -> crate::error::AccountError {
    ValidationFailure::MalformedInitPayload(reason).into()
}
