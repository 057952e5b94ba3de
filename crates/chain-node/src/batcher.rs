//! Groups queued transactions into fixed-size or time-bounded batches.
//!
//! Two cooperating tasks: the intake task fills a pending list and flushes it
//! when full; the timer task counts down the configured limit and flushes
//! whatever is pending when it expires. Filling a batch resets the countdown.

use std::time::Duration;

use chain_core::TransactionSubmission;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::debug;

pub fn spawn(
    tran_rx: mpsc::Receiver<TransactionSubmission>,
    batch_tx: mpsc::Sender<Vec<TransactionSubmission>>,
    max_transactions: usize,
    time_limit_minutes: u64,
) {
    let (timer_tx, timer_rx) = mpsc::channel(1);
    let (reset_tx, reset_rx) = mpsc::channel(1);
    tokio::spawn(run_timer(timer_tx, reset_rx, time_limit_minutes));
    tokio::spawn(run_intake(
        tran_rx,
        timer_rx,
        reset_tx,
        batch_tx,
        max_transactions,
    ));
}

/// Transactions observed earlier land in the same or an earlier batch; within
/// a batch, intake order is preserved.
async fn run_intake(
    mut tran_rx: mpsc::Receiver<TransactionSubmission>,
    mut timer_rx: mpsc::Receiver<()>,
    reset_tx: mpsc::Sender<()>,
    batch_tx: mpsc::Sender<Vec<TransactionSubmission>>,
    max_transactions: usize,
) {
    let mut pending: Vec<TransactionSubmission> = Vec::new();
    loop {
        tokio::select! {
            maybe_tran = tran_rx.recv() => {
                let Some(transaction) = maybe_tran else { break };
                if pending.len() < max_transactions {
                    pending.push(transaction);
                } else {
                    let _ = reset_tx.send(()).await;
                    let batch = std::mem::replace(&mut pending, vec![transaction]);
                    debug!(size = batch.len(), "batch full, handing to the miner");
                    if batch_tx.send(batch).await.is_err() {
                        break;
                    }
                }
            }
            flush = timer_rx.recv() => {
                if flush.is_none() {
                    break;
                }
                if !pending.is_empty() {
                    let batch = std::mem::take(&mut pending);
                    debug!(size = batch.len(), "time limit reached, handing to the miner");
                    if batch_tx.send(batch).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn run_timer(
    timer_tx: mpsc::Sender<()>,
    mut reset_rx: mpsc::Receiver<()>,
    time_limit_minutes: u64,
) {
    let countdown = time_limit_minutes * 60;
    let mut remaining = countdown;
    let period = Duration::from_secs(1);
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            reset = reset_rx.recv() => {
                if reset.is_none() {
                    break;
                }
                remaining = countdown;
            }
            _ = ticker.tick() => {
                remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    remaining = countdown;
                    if timer_tx.send(()).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_core::{Transaction, TransactionStatus};

    fn submission(tag: &str) -> TransactionSubmission {
        TransactionSubmission {
            id: tag.to_string(),
            timestamp: 0,
            transaction_status: TransactionStatus::Pending,
            dropped_reason: String::new(),
            body_signed: String::new(),
            submit: Transaction {
                key: "k".into(),
                value: "v".into(),
                from: "a".into(),
                to: "b".into(),
                coin_amount: 0.0,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_batches_flush_in_intake_order() {
        let (tran_tx, tran_rx) = mpsc::channel(10);
        let (batch_tx, mut batch_rx) = mpsc::channel(1);
        spawn(tran_rx, batch_tx, 2, 10);

        for tag in ["t0", "t1", "t2"] {
            tran_tx.send(submission(tag)).await.unwrap();
        }

        let batch = batch_rx.recv().await.unwrap();
        let ids: Vec<_> = batch.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["t0", "t1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_a_partial_batch() {
        let (tran_tx, tran_rx) = mpsc::channel(10);
        let (batch_tx, mut batch_rx) = mpsc::channel(1);
        spawn(tran_rx, batch_tx, 500, 1);

        tran_tx.send(submission("lonely")).await.unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(120), batch_rx.recv())
            .await
            .expect("timer should flush within the limit")
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, "lonely");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pending_list_is_not_flushed() {
        let (_tran_tx, tran_rx) = mpsc::channel::<TransactionSubmission>(10);
        let (batch_tx, mut batch_rx) = mpsc::channel(1);
        spawn(tran_rx, batch_tx, 500, 1);

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(batch_rx.try_recv().is_err());
    }
}
