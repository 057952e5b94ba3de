//! In-memory secondary index over the written chain: transaction id, keyword,
//! and user key each map to (file, offset-within-block) locations. One mutex
//! guards all three maps; block files are read outside the critical section.

use std::collections::HashMap;
use std::sync::Mutex;

use chain_core::{ChainError, ChainResult, TransactionSubmission};

use crate::BlockStore;

/// file name -> ordered transaction indices within that block
pub type FilePaths = HashMap<String, Vec<usize>>;

#[derive(Debug, Default)]
struct IndexMaps {
    transaction_ids: HashMap<String, (String, usize)>,
    keywords: HashMap<String, FilePaths>,
    users: HashMap<String, FilePaths>,
}

pub struct SearchIndex {
    maps: Mutex<IndexMaps>,
    store: BlockStore,
}

impl SearchIndex {
    pub fn new(store: BlockStore) -> Self {
        Self {
            maps: Mutex::new(IndexMaps::default()),
            store,
        }
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn set_transaction_path(&self, transaction_id: &str, file_name: &str, index: usize) {
        self.lock()
            .transaction_ids
            .insert(transaction_id.to_string(), (file_name.to_string(), index));
    }

    pub fn add_keyword_path(&self, keyword: &str, file_name: &str, index: usize) {
        let mut maps = self.lock();
        maps.keywords
            .entry(keyword.to_string())
            .or_default()
            .entry(file_name.to_string())
            .or_default()
            .push(index);
    }

    pub fn add_user_path(&self, user_key: &str, file_name: &str, index: usize) {
        let mut maps = self.lock();
        maps.users
            .entry(user_key.to_string())
            .or_default()
            .entry(file_name.to_string())
            .or_default()
            .push(index);
    }

    pub fn transaction_path(&self, transaction_id: &str) -> ChainResult<(String, usize)> {
        self.lock()
            .transaction_ids
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| {
                ChainError::NotFound(
                    "transaction ID does not exist in blockchain location index".into(),
                )
            })
    }

    pub fn keyword_paths(&self, keyword: &str) -> ChainResult<FilePaths> {
        self.lock().keywords.get(keyword).cloned().ok_or_else(|| {
            ChainError::NotFound("keyword does not exist in blockchain location index".into())
        })
    }

    pub fn user_paths(&self, user_key: &str) -> ChainResult<FilePaths> {
        self.lock().users.get(user_key).cloned().ok_or_else(|| {
            ChainError::NotFound("userID does not exist in blockchain location index".into())
        })
    }

    /// Pull the transactions at `indices` out of one block file.
    pub fn transactions_from_file(
        &self,
        file_name: &str,
        indices: &[usize],
    ) -> ChainResult<Vec<TransactionSubmission>> {
        let block = self.store.read_block(file_name)?;
        let mut result = Vec::with_capacity(indices.len());
        for &index in indices {
            let transaction = block.transactions.get(index).ok_or_else(|| {
                ChainError::NotFound(format!(
                    "transaction index {index} is out of range for block file {file_name}"
                ))
            })?;
            result.push(transaction.clone());
        }
        Ok(result)
    }

    pub fn transactions_from_files(
        &self,
        paths: &FilePaths,
    ) -> ChainResult<Vec<TransactionSubmission>> {
        let mut result = Vec::new();
        for (file_name, indices) in paths {
            result.extend(self.transactions_from_file(file_name, indices)?);
        }
        Ok(result)
    }

    /// Net coin balance of `user_key` over the written chain: subtract sent
    /// amounts, add received amounts, ignore dropped transactions. Errors
    /// when the user appears nowhere in the index.
    pub fn written_user_balance(&self, user_key: &str) -> ChainResult<f64> {
        let paths = self.user_paths(user_key)?;
        let mut balance = 0.0;
        for (file_name, indices) in &paths {
            for transaction in self.transactions_from_file(file_name, indices)? {
                if transaction.is_dropped() {
                    continue;
                }
                if user_key == transaction.submit.from {
                    balance -= transaction.submit.coin_amount;
                } else if user_key == transaction.submit.to {
                    balance += transaction.submit.coin_amount;
                }
            }
        }
        Ok(balance)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMaps> {
        self.maps.lock().expect("search index lock poisoned")
    }
}
