//! Shared validation for peer-submitted blocks on the sign and accept paths.

use std::collections::HashMap;

use axum::http::StatusCode;
use chain_core::tip::ChainTip;
use chain_core::{canonical_json, crypto, pow, BlockRequest, NodeSignatures};
use chain_storage::SearchIndex;

use crate::handlers::ApiError;

/// How the running-balance check treats users absent from the written chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalancePolicy {
    /// An unknown sender or receiver rejects the block (sign path).
    Strict,
    /// An unknown sender is allowed only for zero-coin transactions and an
    /// unknown receiver starts at zero (accept path).
    TolerateUnknown,
}

/// Request-level checks: the block must extend this node's tip, must not
/// originate from this node, and must carry a verifying origin signature at
/// element 0.
pub fn validate_peer_request(
    sign_request: &NodeSignatures,
    block_bytes: &[u8],
    self_public_pem: &str,
    tip: &ChainTip,
) -> Result<(), ApiError> {
    let block = &sign_request.block;
    if block.header.prev_block_hash != tip.prev_hash() {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "PrevBlockHash does not match last written block hash",
        ));
    }
    if block.origin_node_public_key.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "OriginNodePublicKey is empty",
        ));
    }
    if block.origin_node_public_key == self_public_pem {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "refusing a block that originated from this node",
        ));
    }
    let origin_signature = match sign_request.node_signatures.first() {
        Some(signature) if signature.public_key == block.origin_node_public_key => signature,
        _ => {
            return Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                "block is not signed by the origin node",
            ))
        }
    };
    let signature = crypto::signature_from_hex(&origin_signature.signed_block_request).map_err(
        |err| {
            ApiError::with_detail(
                StatusCode::BAD_REQUEST,
                "could not decode the signed block from the origin node",
                err,
            )
        },
    )?;
    crypto::verify_pem(&block.origin_node_public_key, block_bytes, &signature).map_err(|_| {
        ApiError::new(
            StatusCode::UNAUTHORIZED,
            "invalid signature from the origin node",
        )
    })?;
    Ok(())
}

/// Block-level validation: the proof of work must reproduce, every
/// transaction signature must verify, and no non-dropped transaction may
/// overdraw its sender.
pub fn validate_block(
    block: &BlockRequest,
    index: &SearchIndex,
    policy: BalancePolicy,
) -> Result<(), ApiError> {
    let pow_ok = pow::verify(&block.header, &block.proof_of_work_hash).map_err(|err| {
        ApiError::with_detail(
            StatusCode::BAD_REQUEST,
            "could not encode the block header for hashing",
            err,
        )
    })?;
    if !pow_ok {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "invalid proof of work or mismatching block header hash",
        ));
    }

    let mut balances: HashMap<String, f64> = HashMap::new();
    for transaction in &block.transactions {
        let submitted_bytes = canonical_json(&transaction.submit).map_err(|err| {
            ApiError::with_detail(
                StatusCode::BAD_REQUEST,
                "could not encode the transaction for verification",
                err,
            )
        })?;
        let signature = crypto::signature_from_hex(&transaction.body_signed).map_err(|err| {
            ApiError::with_detail(
                StatusCode::BAD_REQUEST,
                "could not decode the signedBody for verification",
                err,
            )
        })?;
        crypto::verify_pem(&transaction.submit.from, &submitted_bytes, &signature).map_err(
            |err| {
                ApiError::with_detail(
                    StatusCode::UNAUTHORIZED,
                    "could not verify the transaction with the public key",
                    err,
                )
            },
        )?;

        if transaction.is_dropped() {
            // dropped transactions ride along unevaluated
            continue;
        }
        if transaction.submit.coin_amount < 0.0 {
            return Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                "transaction has negative coin",
            ));
        }

        let amount = transaction.submit.coin_amount;
        let sender = transaction.submit.from.clone();
        let sender_balance = match balances.get(&sender).copied() {
            Some(balance) => balance,
            None => match index.written_user_balance(&sender) {
                Ok(balance) => balance,
                Err(err) => {
                    if policy == BalancePolicy::TolerateUnknown && amount == 0.0 {
                        0.0
                    } else {
                        return Err(ApiError::with_detail(
                            StatusCode::UNAUTHORIZED,
                            "could not get the From-User balance from the written blocks",
                            err,
                        ));
                    }
                }
            },
        };
        let receiver = transaction.submit.to.clone();
        let receiver_balance = match balances.get(&receiver).copied() {
            Some(balance) => balance,
            None => match index.written_user_balance(&receiver) {
                Ok(balance) => balance,
                Err(err) => match policy {
                    BalancePolicy::TolerateUnknown => 0.0,
                    BalancePolicy::Strict => {
                        return Err(ApiError::with_detail(
                            StatusCode::UNAUTHORIZED,
                            "could not get the To-User balance from the written blocks",
                            err,
                        ))
                    }
                },
            },
        };
        if sender_balance - amount < 0.0 {
            return Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                "Not enough Coin in user balance",
            ));
        }
        balances.insert(sender, sender_balance - amount);
        balances.insert(receiver, receiver_balance + amount);
    }
    Ok(())
}
