//! HTTP handlers for the node's user- and peer-facing endpoints.
//!
//! The three POST-body endpoints parse raw bytes themselves so malformed JSON
//! is a 400 rather than the extractor's 422.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chain_core::constants::{CLAIM_TIMEOUT_SECS, TRANSACTION_ID_LEN};
use chain_core::crypto::{self, PUBLIC_KEY_PEM_HEADER};
use chain_core::tip::ChainTip;
use chain_core::{
    canonical_json, sha256_hex, unix_now, NodeSignature, NodeSignatures, TransactionSubmission,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::validate::{self, BalancePolicy};
use crate::AppState;

/// Error reply in the `{"message": ..., "error": ...}` shape used everywhere
/// on this API.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(
        status: StatusCode,
        message: impl Into<String>,
        detail: impl ToString,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            detail: Some(detail.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.detail {
            Some(detail) => json!({"message": self.message, "error": detail}),
            None => json!({"message": self.message}),
        };
        (self.status, Json(body)).into_response()
    }
}

pub async fn healthcheck() -> StatusCode {
    StatusCode::OK
}

/// Transaction intake: verify the user's signature, stamp the submission with
/// a timestamp and id, and enqueue it for batching. Balances are not checked
/// here; the miner evaluates them against the written chain.
pub async fn transaction(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let mut submission: TransactionSubmission = serde_json::from_slice(&body).map_err(|err| {
        ApiError::with_detail(
            StatusCode::BAD_REQUEST,
            "could not parse json of request body",
            err,
        )
    })?;

    if submission.submit.coin_amount < 0.0 {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "don't send a negative coin amount",
        ));
    }

    let submitted_bytes = canonical_json(&submission.submit).map_err(|err| {
        ApiError::with_detail(
            StatusCode::BAD_REQUEST,
            "could not encode the transaction for verification",
            err,
        )
    })?;
    let signature = crypto::signature_from_hex(&submission.body_signed).map_err(|err| {
        ApiError::with_detail(
            StatusCode::BAD_REQUEST,
            "could not decode the signedBody for verification",
            err,
        )
    })?;
    crypto::verify_pem(&submission.submit.from, &submitted_bytes, &signature).map_err(|err| {
        ApiError::with_detail(
            StatusCode::UNAUTHORIZED,
            "could not verify the transaction with the public key",
            err,
        )
    })?;

    // The id hashes the submission including the server timestamp, so the
    // same signed body submitted twice yields two ids.
    submission.timestamp = unix_now();
    let encoded = canonical_json(&submission).map_err(|err| {
        ApiError::with_detail(
            StatusCode::BAD_REQUEST,
            "could not encode the transaction to create the transaction ID",
            err,
        )
    })?;
    submission.id = sha256_hex(&encoded);

    let transaction_id = submission.id.clone();
    state.tran_tx.send(submission).await.map_err(|_| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "the transaction queue is closed",
        )
    })?;

    Ok(Json(
        json!({"submission": "success", "transaction_id": transaction_id}),
    ))
}

fn parse_node_signatures(body: &[u8]) -> Result<NodeSignatures, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        ApiError::with_detail(
            StatusCode::BAD_REQUEST,
            "could not parse json of request body",
            err,
        )
    })
}

/// Force-release an abandoned sign claim once the window expires. The release
/// is conditional: an accepted block may have already released or re-claimed.
pub fn spawn_claim_expiry(tip: Arc<ChainTip>, by: String, block_id: String) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(CLAIM_TIMEOUT_SECS)).await;
        if tip.release_if_held(&by, &block_id) {
            debug!(block_id, "sign claim expired without a block, released");
        }
    });
}

/// Peer endpoint: validate a proposed block, claim the append slot for it
/// (with expiry), and countersign.
pub async fn block_sign(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<NodeSignatures>, ApiError> {
    let mut sign_request = parse_node_signatures(&body)?;
    let block_bytes = canonical_json(&sign_request.block).map_err(|err| {
        ApiError::with_detail(
            StatusCode::BAD_REQUEST,
            "could not encode the block for signing",
            err,
        )
    })?;

    validate::validate_peer_request(
        &sign_request,
        &block_bytes,
        state.keys.public_pem(),
        &state.tip,
    )?;
    validate::validate_block(&sign_request.block, &state.index, BalancePolicy::Strict)?;

    let block = &sign_request.block;
    state
        .tip
        .claim(
            &block.origin_node_public_key,
            &block.proof_of_work_hash,
            &block.header.prev_block_hash,
        )
        .map_err(|err| {
            ApiError::with_detail(
                StatusCode::UNAUTHORIZED,
                "the previous block hash is already claimed or trying to claim the wrong prevBlockHash",
                err,
            )
        })?;
    spawn_claim_expiry(
        state.tip.clone(),
        block.origin_node_public_key.clone(),
        block.proof_of_work_hash.clone(),
    );

    let signature = state.keys.sign(&block_bytes);
    sign_request.node_signatures.push(NodeSignature {
        public_key: state.keys.public_pem().to_string(),
        signed_block_request: crypto::signature_to_hex(&signature),
    });
    Ok(Json(sign_request))
}

/// Peer endpoint: validate a multi-signed block and hand it to the committer.
/// Writing the block releases the claim.
pub async fn block(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let sign_request = parse_node_signatures(&body)?;
    let block_bytes = canonical_json(&sign_request.block).map_err(|err| {
        ApiError::with_detail(
            StatusCode::BAD_REQUEST,
            "could not encode the block for verification",
            err,
        )
    })?;

    validate::validate_peer_request(
        &sign_request,
        &block_bytes,
        state.keys.public_pem(),
        &state.tip,
    )?;
    validate::validate_block(
        &sign_request.block,
        &state.index,
        BalancePolicy::TolerateUnknown,
    )?;

    // Count the countersignatures; malformed ones are skipped rather than
    // counted as invalid.
    let mut valid_signatures = 0usize;
    for node_signature in sign_request.node_signatures.iter().skip(1) {
        let Ok(signature) = crypto::signature_from_hex(&node_signature.signed_block_request)
        else {
            continue;
        };
        if crypto::verify_pem(&node_signature.public_key, &block_bytes, &signature).is_ok() {
            valid_signatures += 1;
        }
    }
    debug!(valid_signatures, "verified peer countersignatures");

    let block = sign_request.block;
    if let Err(err) = state.tip.claim(
        &block.origin_node_public_key,
        &block.proof_of_work_hash,
        &block.header.prev_block_hash,
    ) {
        // A failed claim is still acceptable when this node already promised
        // the slot to exactly this block via its sign response.
        let (_, claimed_by, claim_block_id) = state.tip.claim_state();
        if claimed_by != block.origin_node_public_key
            || claim_block_id != block.proof_of_work_hash
        {
            return Err(ApiError::with_detail(
                StatusCode::UNAUTHORIZED,
                "the previous block hash is already claimed or trying to claim the wrong prevBlockHash",
                err,
            ));
        }
    }

    state.write_tx.send(block).await.map_err(|_| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "the commit queue is closed",
        )
    })?;
    Ok(StatusCode::OK)
}

pub async fn search_transaction(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<Vec<TransactionSubmission>>, ApiError> {
    if transaction_id.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "transaction ID is empty",
        ));
    }
    if transaction_id.len() != TRANSACTION_ID_LEN {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "transaction ID is not 64 characters",
        ));
    }
    let (file_name, index) = state
        .index
        .transaction_path(&transaction_id)
        .map_err(|err| {
            ApiError::with_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "error finding transaction",
                err,
            )
        })?;
    let transactions = state
        .index
        .transactions_from_file(&file_name, &[index])
        .map_err(|err| {
            ApiError::with_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "error finding transaction",
                err,
            )
        })?;
    Ok(Json(transactions))
}

pub async fn search_keyword(
    State(state): State<Arc<AppState>>,
    Path(keyword): Path<String>,
) -> Result<Json<Vec<TransactionSubmission>>, ApiError> {
    if keyword.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "keyword is empty"));
    }
    let paths = state.index.keyword_paths(&keyword).map_err(|err| {
        ApiError::with_detail(
            StatusCode::INTERNAL_SERVER_ERROR,
            "error finding transactions",
            err,
        )
    })?;
    let transactions = state.index.transactions_from_files(&paths).map_err(|err| {
        ApiError::with_detail(
            StatusCode::INTERNAL_SERVER_ERROR,
            "error finding transactions",
            err,
        )
    })?;
    Ok(Json(transactions))
}

/// The user key arrives hex-encoded because a PEM does not survive a URL
/// path segment.
pub async fn search_user(
    State(state): State<Arc<AppState>>,
    Path(user_publickey_hexencoded): Path<String>,
) -> Result<Json<Vec<TransactionSubmission>>, ApiError> {
    let user_bytes = hex::decode(&user_publickey_hexencoded).map_err(|_| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "user ID Public PEM string should be hexadecimal encoded for the url",
        )
    })?;
    let user_key = String::from_utf8(user_bytes).map_err(|_| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "user ID should be a Public RSA PEM string",
        )
    })?;
    if user_key.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "user ID is empty"));
    }
    if !user_key.starts_with(PUBLIC_KEY_PEM_HEADER) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "user ID should be a Public RSA PEM string",
        ));
    }
    let paths = state.index.user_paths(&user_key).map_err(|err| {
        ApiError::with_detail(
            StatusCode::INTERNAL_SERVER_ERROR,
            "error finding transactions",
            err,
        )
    })?;
    let transactions = state.index.transactions_from_files(&paths).map_err(|err| {
        ApiError::with_detail(
            StatusCode::INTERNAL_SERVER_ERROR,
            "error finding transactions",
            err,
        )
    })?;
    Ok(Json(transactions))
}
