mod helpers;

use chain_core::{canonical_json, ChainError};
use chain_storage::{BlockStore, SearchIndex};
use helpers::{block_with, commit_block, create_temp_store, submission};

#[test]
fn block_write_and_read_round_trip() -> anyhow::Result<()> {
    let (_temp_dir, store) = create_temp_store();
    let block = block_with(vec![submission("greeting", "alice-pem", "bob-pem", 0.25)]);
    let block_bytes = canonical_json(&block)?;
    let file_name = BlockStore::file_name(&block_bytes, 1);

    store.write_block(&file_name, &block_bytes)?;
    assert!(store.block_path(&file_name).exists());
    assert!(file_name.ends_with("_1"));

    let read_back = store.read_block(&file_name)?;
    assert_eq!(read_back.proof_of_work_hash, block.proof_of_work_hash);
    assert_eq!(read_back.transactions.len(), 1);
    assert_eq!(read_back.transactions[0].submit.key, "greeting");
    // the stored bytes are exactly the canonical encoding
    assert_eq!(canonical_json(&read_back)?, block_bytes);
    Ok(())
}

#[cfg(unix)]
#[test]
fn block_files_are_world_readable() -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let (_temp_dir, store) = create_temp_store();
    let block = block_with(vec![]);
    let block_bytes = canonical_json(&block)?;
    let file_name = BlockStore::file_name(&block_bytes, 1);
    store.write_block(&file_name, &block_bytes)?;

    let mode = std::fs::metadata(store.block_path(&file_name))?
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o644);
    Ok(())
}

#[test]
fn index_locates_transactions_by_id_keyword_and_user() -> anyhow::Result<()> {
    let (_temp_dir, store) = create_temp_store();
    let index = SearchIndex::new(store.clone());

    let tx_a = submission("invoice", "alice-pem", "bob-pem", 1.0);
    let tx_b = submission("invoice", "carol-pem", "alice-pem", 2.0);
    let block = block_with(vec![tx_a.clone(), tx_b.clone()]);
    let file_name = commit_block(&store, &index, &block, 1);

    let (found_file, found_index) = index.transaction_path(&tx_a.id)?;
    assert_eq!(found_file, file_name);
    assert_eq!(found_index, 0);
    let by_id = index.transactions_from_file(&found_file, &[found_index])?;
    assert_eq!(by_id[0].id, tx_a.id);

    let keyword_paths = index.keyword_paths("invoice")?;
    assert_eq!(keyword_paths[&file_name], vec![0, 1]);
    let by_keyword = index.transactions_from_files(&keyword_paths)?;
    assert_eq!(by_keyword.len(), 2);

    let alice_paths = index.user_paths("alice-pem")?;
    assert_eq!(alice_paths[&file_name], vec![0, 1]);
    Ok(())
}

#[test]
fn index_misses_report_what_was_searched() {
    let (_temp_dir, store) = create_temp_store();
    let index = SearchIndex::new(store);

    let err = index.transaction_path(&"0".repeat(64)).unwrap_err();
    assert!(matches!(err, ChainError::NotFound(_)));
    assert!(err.to_string().contains("transaction ID does not exist"));

    let err = index.keyword_paths("missing").unwrap_err();
    assert!(err.to_string().contains("keyword does not exist"));

    let err = index.user_paths("nobody-pem").unwrap_err();
    assert!(err.to_string().contains("userID does not exist"));
}

#[test]
fn balance_sums_sent_and_received_amounts() -> anyhow::Result<()> {
    let (_temp_dir, store) = create_temp_store();
    let index = SearchIndex::new(store.clone());

    let first = block_with(vec![submission("pay", "alice-pem", "bob-pem", 2.0)]);
    commit_block(&store, &index, &first, 1);
    let second = block_with(vec![submission("refund", "bob-pem", "alice-pem", 0.5)]);
    commit_block(&store, &index, &second, 2);

    assert_eq!(index.written_user_balance("alice-pem")?, -1.5);
    assert_eq!(index.written_user_balance("bob-pem")?, 1.5);
    Ok(())
}

#[test]
fn balance_ignores_dropped_transactions() -> anyhow::Result<()> {
    let (_temp_dir, store) = create_temp_store();
    let index = SearchIndex::new(store.clone());

    let mut dropped = submission("pay", "alice-pem", "bob-pem", 100.0);
    dropped.mark_dropped("Not enough Coin in user balance");
    let kept = submission("pay", "alice-pem", "bob-pem", 1.0);
    let block = block_with(vec![dropped, kept]);
    commit_block(&store, &index, &block, 1);

    assert_eq!(index.written_user_balance("alice-pem")?, -1.0);
    assert_eq!(index.written_user_balance("bob-pem")?, 1.0);
    Ok(())
}

#[test]
fn balance_for_unknown_user_is_an_error() {
    let (_temp_dir, store) = create_temp_store();
    let index = SearchIndex::new(store);
    let err = index.written_user_balance("ghost-pem").unwrap_err();
    assert!(err.to_string().contains("userID does not exist"));
}
