//! The miner / commit driver. Each batch gets its balances evaluated against
//! the written chain, a proof of work mined, the local append slot claimed,
//! and the two-phase peer protocol run before the block reaches the
//! committer. A batch that keeps failing is recorded as a dropped block.

use std::collections::HashMap;
use std::sync::Arc;

use chain_core::constants::{DIFFICULTY_PREFIX, DROPPED_BLOCK_HASH, SCRUBBED_PREV_HASH};
use chain_core::crypto::{self, NodeKeys};
use chain_core::tip::ChainTip;
use chain_core::{
    canonical_json, pow, sha256_hex, unix_now, BlockHeader, BlockRequest, NodeSignature,
    NodeSignatures, TransactionSubmission,
};
use chain_storage::SearchIndex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::constants::MAX_MINING_RETRIES;
use crate::peers::{self, PeerNetwork};

pub struct Miner {
    pub tip: Arc<ChainTip>,
    pub index: Arc<SearchIndex>,
    pub keys: Arc<NodeKeys>,
    pub network: Arc<dyn PeerNetwork>,
    pub write_tx: mpsc::Sender<BlockRequest>,
    pub sign_reject_percent: u32,
    pub commit_reject_percent: u32,
}

impl Miner {
    pub async fn run(self, mut batch_rx: mpsc::Receiver<Vec<TransactionSubmission>>) {
        while let Some(batch) = batch_rx.recv().await {
            if let Err(err) = self.process_batch(batch).await {
                // channel closures on shutdown end up here; nothing to salvage
                warn!(error = %err, "batch processing aborted");
                return;
            }
        }
    }

    /// One commit or one drop per batch, never more.
    async fn process_batch(&self, mut batch: Vec<TransactionSubmission>) -> anyhow::Result<()> {
        check_spend_allowed(&self.index, &mut batch);

        let transactions_hash = sha256_hex(&canonical_json(&batch)?);

        for retry in 0..MAX_MINING_RETRIES {
            let mut header = BlockHeader {
                prev_block_hash: self.tip.prev_hash(),
                transactions_hash: transactions_hash.clone(),
                time: unix_now(),
                nonce: String::new(),
            };
            // the nonce search is CPU-bound; keep it off the async workers
            let (header, proof_of_work_hash) = tokio::task::spawn_blocking(move || {
                let hash = pow::search(&mut header, DIFFICULTY_PREFIX)?;
                Ok::<_, chain_core::ChainError>((header, hash))
            })
            .await??;

            let block = BlockRequest {
                origin_node_public_key: self.keys.public_pem().to_string(),
                proof_of_work_hash,
                header,
                transactions: batch.clone(),
            };
            let block_bytes = canonical_json(&block)?;
            let signature = self.keys.sign(&block_bytes);
            let mut send_off = NodeSignatures {
                node_signatures: vec![NodeSignature {
                    public_key: self.keys.public_pem().to_string(),
                    signed_block_request: crypto::signature_to_hex(&signature),
                }],
                block,
            };

            // if a peer-submitted block won the race for the slot, re-read
            // the tip and mine again
            if let Err(err) = self.tip.claim(
                &send_off.block.origin_node_public_key,
                &send_off.block.proof_of_work_hash,
                &send_off.block.header.prev_block_hash,
            ) {
                debug!(retry, error = %err, "could not claim the append slot");
                continue;
            }

            match peers::sign_and_distribute(
                self.network.as_ref(),
                &mut send_off,
                self.sign_reject_percent,
                self.commit_reject_percent,
            )
            .await
            {
                Ok(()) => {
                    info!(
                        hash = %send_off.block.proof_of_work_hash,
                        transactions = send_off.block.transactions.len(),
                        "block accepted by the network"
                    );
                    self.write_tx.send(send_off.block).await?;
                    return Ok(());
                }
                Err(err) => {
                    warn!(retry, error = %err, "peers rejected the block, retrying");
                    self.tip.release(
                        &send_off.block.origin_node_public_key,
                        &send_off.block.proof_of_work_hash,
                    );
                }
            }
        }

        self.write_dropped_block(batch).await
    }

    /// Record the batch locally as a dropped block. Dropped blocks are never
    /// broadcast to peers.
    async fn write_dropped_block(
        &self,
        mut batch: Vec<TransactionSubmission>,
    ) -> anyhow::Result<()> {
        warn!(
            transactions = batch.len(),
            "exhausted mining retries, dropping the batch"
        );
        for transaction in &mut batch {
            transaction.mark_dropped("exceeded retries and dropped block");
        }
        let block = BlockRequest {
            origin_node_public_key: self.keys.public_pem().to_string(),
            proof_of_work_hash: DROPPED_BLOCK_HASH.to_string(),
            header: BlockHeader {
                prev_block_hash: SCRUBBED_PREV_HASH.to_string(),
                transactions_hash: String::new(),
                time: unix_now(),
                nonce: String::new(),
            },
            transactions: batch,
        };
        self.write_tx.send(block).await?;
        Ok(())
    }
}

/// Mark transactions that would overdraw their sender as dropped, tracking
/// balances across the batch so later transactions see earlier ones. Balances
/// are seeded lazily from the written chain; an unknown sender or receiver
/// drops the transaction with the index's error text.
pub fn check_spend_allowed(index: &SearchIndex, batch: &mut [TransactionSubmission]) {
    let mut balances: HashMap<String, f64> = HashMap::new();

    for transaction in batch.iter_mut() {
        let amount = transaction.submit.coin_amount;
        if amount < 0.0 {
            // intake already rejects these; a peer-crafted batch could not
            transaction.mark_dropped("CoinAmount is negative");
            continue;
        }

        let sender = transaction.submit.from.clone();
        let sender_balance = match balances.get(&sender).copied() {
            Some(balance) => balance,
            None => match index.written_user_balance(&sender) {
                Ok(balance) => {
                    balances.insert(sender.clone(), balance);
                    balance
                }
                Err(err) => {
                    transaction.mark_dropped(err.to_string());
                    continue;
                }
            },
        };

        // the receiver might be the sender of a later transaction
        let receiver = transaction.submit.to.clone();
        let receiver_balance = match balances.get(&receiver).copied() {
            Some(balance) => balance,
            None => match index.written_user_balance(&receiver) {
                Ok(balance) => {
                    balances.insert(receiver.clone(), balance);
                    balance
                }
                Err(err) => {
                    transaction.mark_dropped(err.to_string());
                    continue;
                }
            },
        };

        if sender_balance - amount < 0.0 {
            transaction.mark_dropped("Not enough Coin in user balance");
            continue;
        }

        balances.insert(sender, sender_balance - amount);
        balances.insert(receiver, receiver_balance + amount);
    }
}
