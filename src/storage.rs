use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::account::{Account, Address};

const ACCOUNT_PREFIX: &str = "account:";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("corrupt key {0}")]
    CorruptKey(String),
}

/// Account state store. Each account lives under its own
/// `account:<address>` key and is never touched by another account's logic.
pub struct Storage {
    db: sled::Db,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Storage { db })
    }

    // Generic Helper: Put
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let serialized = bincode::serialize(value)?;
        self.db.insert(key.as_bytes(), serialized)?;
        Ok(())
    }

    // Generic Helper: Get
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.db.get(key.as_bytes())? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    // --- Accounts ---

    pub fn save_account(&self, account: &Account) -> Result<(), StorageError> {
        self.put(&account_key(&account.address()), account)?;
        self.db.flush()?;
        debug!(account = %account.address(), nonce = account.nonce(), "account saved");
        Ok(())
    }

    pub fn load_account(&self, address: &Address) -> Result<Option<Account>, StorageError> {
        self.get(&account_key(address))
    }

    /// Addresses of every stored account, in key order.
    pub fn accounts(&self) -> Result<Vec<Address>, StorageError> {
        self.db
            .scan_prefix(ACCOUNT_PREFIX.as_bytes())
            .keys()
            .map(|key| {
                let key = key?;
                let text = String::from_utf8_lossy(&key);
                text.strip_prefix(ACCOUNT_PREFIX)
                    .and_then(|hex| hex.parse().ok())
                    .ok_or_else(|| StorageError::CorruptKey(text.to_string()))
            })
            .collect()
    }
}

fn account_key(address: &Address) -> String {
    format!("{}{}", ACCOUNT_PREFIX, address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{InitParams, H256};
    use crate::config::TimelockConfig;

    fn deployed(address: Address) -> Account {
        let mut account = Account::new(address, &TimelockConfig::default());
        let payload = InitParams {
            primary: Address([1; 20]),
            second_factor: None,
            dual_factor: false,
        }
        .encode(H256::ZERO);
        account.deploy(&payload, 10).unwrap();
        account
    }

    #[test]
    fn test_account_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let address = Address([0xab; 20]);
        {
            let storage = Storage::open(dir.path()).unwrap();
            storage.save_account(&deployed(address)).unwrap();
        }
        let storage = Storage::open(dir.path()).unwrap();
        let loaded = storage.load_account(&address).unwrap().unwrap();
        assert!(loaded.is_deployed());
        assert_eq!(loaded.registry().primary(), Some(Address([1; 20])));
        assert_eq!(loaded.guardians().unwrap().threshold(), 1);
    }

    #[test]
    fn test_accounts_lists_saved_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        assert!(storage.accounts().unwrap().is_empty());
        storage.save_account(&deployed(Address([2; 20]))).unwrap();
        storage.save_account(&deployed(Address([1; 20]))).unwrap();
        storage.put("other:key", &5u8).unwrap();
        assert_eq!(
            storage.accounts().unwrap(),
            vec![Address([1; 20]), Address([2; 20])]
        );
        assert!(storage.load_account(&Address([3; 20])).unwrap().is_none());
    }
}
