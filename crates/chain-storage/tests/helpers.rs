use chain_core::{
    canonical_json, sha256_hex, BlockHeader, BlockRequest, Transaction, TransactionStatus,
    TransactionSubmission,
};
use chain_storage::{BlockStore, SearchIndex};
use tempfile::{tempdir, TempDir};

pub fn create_temp_store() -> (TempDir, BlockStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let store = BlockStore::new(temp_dir.path().join("written"));
    (temp_dir, store)
}

pub fn submission(key: &str, from: &str, to: &str, amount: f64) -> TransactionSubmission {
    let submit = Transaction {
        key: key.to_string(),
        value: "anything".to_string(),
        from: from.to_string(),
        to: to.to_string(),
        coin_amount: amount,
    };
    let mut sub = TransactionSubmission {
        id: String::new(),
        timestamp: 1_700_000_000,
        transaction_status: TransactionStatus::Pending,
        dropped_reason: String::new(),
        body_signed: "00".to_string(),
        submit,
    };
    sub.id = sha256_hex(&canonical_json(&sub).expect("encode submission"));
    sub
}

pub fn block_with(transactions: Vec<TransactionSubmission>) -> BlockRequest {
    BlockRequest {
        origin_node_public_key: "origin-pem".to_string(),
        proof_of_work_hash: "00000".to_string() + &"a".repeat(59),
        header: BlockHeader {
            prev_block_hash: String::new(),
            transactions_hash: sha256_hex(&canonical_json(&transactions).expect("encode txs")),
            time: 1_700_000_000,
            nonce: "MTAx".to_string(),
        },
        transactions,
    }
}

/// Write `block` to disk and index its transactions the way the committer
/// does, returning the file name.
pub fn commit_block(
    store: &BlockStore,
    index: &SearchIndex,
    block: &BlockRequest,
    received_count: u64,
) -> String {
    let block_bytes = canonical_json(block).expect("encode block");
    let file_name = BlockStore::file_name(&block_bytes, received_count);
    for (i, transaction) in block.transactions.iter().enumerate() {
        index.set_transaction_path(&transaction.id, &file_name, i);
        index.add_keyword_path(&transaction.submit.key, &file_name, i);
        index.add_user_path(&transaction.submit.from, &file_name, i);
        index.add_user_path(&transaction.submit.to, &file_name, i);
    }
    store
        .write_block(&file_name, &block_bytes)
        .expect("write block");
    file_name
}
