//! Node internals: intake, batching, mining, the peer protocol, and the
//! committer, wired together behind the HTTP surface in `main.rs`.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use chain_core::crypto::NodeKeys;
use chain_core::tip::ChainTip;
use chain_core::{BlockRequest, TransactionSubmission};
use chain_storage::SearchIndex;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

pub mod batcher;
pub mod committer;
pub mod constants;
pub mod handlers;
pub mod miner;
pub mod peers;
pub mod validate;

/// Shared state behind every HTTP handler.
pub struct AppState {
    pub keys: Arc<NodeKeys>,
    pub tip: Arc<ChainTip>,
    pub index: Arc<SearchIndex>,
    pub tran_tx: mpsc::Sender<TransactionSubmission>,
    pub write_tx: mpsc::Sender<BlockRequest>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthcheck", get(handlers::healthcheck))
        .route("/transaction", post(handlers::transaction))
        .route("/block-sign", post(handlers::block_sign))
        .route("/block", post(handlers::block))
        .route(
            "/search/transaction/:transaction_id",
            post(handlers::search_transaction),
        )
        .route("/search/key/:keyword", post(handlers::search_keyword))
        .route(
            "/search/user/:user_publickey_hexencoded",
            post(handlers::search_user),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
