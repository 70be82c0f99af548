//! Value types shared by every account component

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::crypto::keccak256;
use crate::encoding::CanonicalEncode;

use super::admin::AdminCall;

/// Seconds since the Unix epoch, supplied by the caller of every operation.
pub type Timestamp = u64;

macro_rules! fixed_bytes {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const ZERO: Self = Self([0u8; $len]);

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Parse from a slice that must be exactly the right length.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                <[u8; $len]>::try_from(bytes).ok().map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(trimmed).map_err(|e| format!("invalid hex: {}", e))?;
                Self::from_slice(&bytes).ok_or_else(|| {
                    format!("expected {} bytes, got {}", $len, bytes.len())
                })
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl CanonicalEncode for $name {
            fn encode_into(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.0);
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_string())
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(de::Error::custom)
                } else {
                    <[u8; $len]>::deserialize(deserializer).map(Self)
                }
            }
        }
    };
}

fixed_bytes!(Address, 20);
fixed_bytes!(H256, 32);

impl Address {
    /// Deterministic identity for a well-known label (built-in modules).
    pub fn from_label(label: &str) -> Self {
        let digest = keccak256(label.as_bytes());
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.0[12..]);
        Address(out)
    }
}

/// A single call the account asks its host to perform.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub target: Address,
    pub value: u128,
    pub data: Vec<u8>,
}

impl Call {
    pub fn new(target: Address, value: u128, data: Vec<u8>) -> Self {
        Self { target, value, data }
    }

    /// First four bytes of calldata, if there are at least four.
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.data.get(..4).and_then(|s| <[u8; 4]>::try_from(s).ok())
    }
}

impl CanonicalEncode for Call {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.target.encode_into(out);
        self.value.encode_into(out);
        self.data.encode_into(out);
    }
}

/// What an authorized request asks the account to do.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Action {
    Call(Call),
    Batch(Vec<Call>),
    Admin(AdminCall),
}

impl Action {
    /// External calls carried by this action (empty for administrative ones).
    pub fn calls(&self) -> &[Call] {
        match self {
            Action::Call(call) => std::slice::from_ref(call),
            Action::Batch(calls) => calls,
            Action::Admin(_) => &[],
        }
    }

    /// Total value moved by the action, `None` on overflow.
    pub fn total_value(&self) -> Option<u128> {
        self.calls()
            .iter()
            .try_fold(0u128, |acc, call| acc.checked_add(call.value))
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Action::Admin(_))
    }
}

impl CanonicalEncode for Action {
    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Action::Call(call) => {
                out.push(0x01);
                call.encode_into(out);
            }
            Action::Batch(calls) => {
                out.push(0x02);
                calls.encode_into(out);
            }
            Action::Admin(admin) => {
                out.push(0x03);
                admin.encode_into(out);
            }
        }
    }
}

/// An incoming request: the action, the opaque credential blob that should
/// authorize it, and (for a not-yet-deployed account) the deployment payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Request {
    pub account: Address,
    pub nonce: u64,
    pub action: Action,
    pub credential: Vec<u8>,
    pub init_payload: Option<Vec<u8>>,
}

impl Request {
    pub fn new(account: Address, nonce: u64, action: Action) -> Self {
        Self {
            account,
            nonce,
            action,
            credential: Vec::new(),
            init_payload: None,
        }
    }

    pub fn with_init_payload(mut self, payload: Vec<u8>) -> Self {
        self.init_payload = Some(payload);
        self
    }

    pub fn with_credential(mut self, credential: Vec<u8>) -> Self {
        self.credential = credential;
        self
    }

    /// The digest every credential in the blob must bind to.
    pub fn action_hash(&self) -> H256 {
        action_hash(
            self.account,
            self.nonce,
            self.init_payload.as_deref(),
            &self.action,
        )
    }
}

/// `keccak256(account || nonce || keccak256(init_payload) || canonical(action))`
pub fn action_hash(
    account: Address,
    nonce: u64,
    init_payload: Option<&[u8]>,
    action: &Action,
) -> H256 {
    let mut buf = Vec::with_capacity(128);
    account.encode_into(&mut buf);
    nonce.encode_into(&mut buf);
    keccak256(init_payload.unwrap_or_default()).encode_into(&mut buf);
    action.encode_into(&mut buf);
    keccak256(&buf)
}
