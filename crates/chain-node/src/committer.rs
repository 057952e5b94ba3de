//! Single consumer of the commit channel. Verifies the chain-tip invariants,
//! writes the block file, updates the search index, and advances the tip.

use std::sync::Arc;

use chain_core::tip::ChainTip;
use chain_core::{canonical_json, BlockRequest, ChainResult};
use chain_storage::{BlockStore, SearchIndex};
use tokio::sync::mpsc;
use tracing::info;

pub struct Committer {
    pub tip: Arc<ChainTip>,
    pub index: Arc<SearchIndex>,
    pub store: BlockStore,
}

impl Committer {
    pub async fn run(self, mut write_rx: mpsc::Receiver<BlockRequest>) {
        let mut blocks_received: u64 = 0;
        let mut last_written_hash = String::new();
        while let Some(block) = write_rx.recv().await {
            blocks_received += 1;
            self.commit(&block, blocks_received, &mut last_written_hash)
                .unwrap_or_else(|err| panic!("failed to write block to the chain: {err}"));
        }
    }

    /// Invariant violations here mean a validation path upstream is broken,
    /// so they abort rather than skip the block.
    fn commit(
        &self,
        block: &BlockRequest,
        received_count: u64,
        last_written_hash: &mut String,
    ) -> ChainResult<()> {
        if !block.is_dropped() {
            let tip_prev = self.tip.prev_hash();
            if (!tip_prev.is_empty() && block.header.prev_block_hash != tip_prev)
                || (!last_written_hash.is_empty()
                    && block.header.prev_block_hash != *last_written_hash)
            {
                panic!(
                    "refusing to append: last written hash {last_written_hash:?}, tip {tip_prev:?}, block carries prev-block-hash {:?}",
                    block.header.prev_block_hash
                );
            }
        } else {
            for transaction in &block.transactions {
                if !transaction.is_dropped() {
                    panic!(
                        "dropped block contains a non-dropped transaction: {}",
                        transaction.id
                    );
                }
            }
        }

        let block_bytes = canonical_json(block)?;
        let file_name = BlockStore::file_name(&block_bytes, received_count);

        for (i, transaction) in block.transactions.iter().enumerate() {
            self.index.set_transaction_path(&transaction.id, &file_name, i);
            self.index
                .add_keyword_path(&transaction.submit.key, &file_name, i);
            self.index
                .add_user_path(&transaction.submit.from, &file_name, i);
            self.index
                .add_user_path(&transaction.submit.to, &file_name, i);
        }

        self.store.write_block(&file_name, &block_bytes)?;
        info!(
            file = %file_name,
            dropped = block.is_dropped(),
            transactions = block.transactions.len(),
            "block written"
        );

        if !block.is_dropped() {
            *last_written_hash = block.proof_of_work_hash.clone();
            self.tip.set_prev_hash(&block.proof_of_work_hash);
            self.tip
                .release(&block.origin_node_public_key, &block.proof_of_work_hash);
        }
        Ok(())
    }
}
