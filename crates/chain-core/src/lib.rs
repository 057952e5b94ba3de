use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod constants;
pub mod crypto;
pub mod error;
pub mod pow;
pub mod tip;

pub use error::{ChainError, ChainResult};

/// The inner body a user signs. `from` and `to` are PKCS#1 PEM public keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub key: String,
    pub value: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "coinAmount")]
    pub coin_amount: f64,
}

/// Lifecycle of a submitted transaction. `Pending` renders as the empty
/// string on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    #[default]
    #[serde(rename = "")]
    Pending,
    #[serde(rename = "written")]
    Written,
    #[serde(rename = "dropped")]
    Dropped,
}

/// A transaction wrapped with the server-assigned id and timestamp plus the
/// user's detached signature over the canonical JSON of `submit`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionSubmission {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(rename = "transactionStatus", default)]
    pub transaction_status: TransactionStatus,
    #[serde(rename = "droppedReason", default)]
    pub dropped_reason: String,
    #[serde(rename = "bodySigned")]
    pub body_signed: String,
    pub submit: Transaction,
}

impl TransactionSubmission {
    pub fn is_dropped(&self) -> bool {
        self.transaction_status == TransactionStatus::Dropped
    }

    pub fn mark_dropped(&mut self, reason: impl Into<String>) {
        self.transaction_status = TransactionStatus::Dropped;
        self.dropped_reason = reason.into();
    }
}

/// Block header. `nonce` is the base64 of the decimal digits of the nonce
/// counter. Field order is load-bearing because the proof-of-work hash is
/// taken over the canonical JSON of this struct.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    #[serde(rename = "prev-block-hash")]
    pub prev_block_hash: String,
    #[serde(rename = "transactions-hash")]
    pub transactions_hash: String,
    pub time: i64,
    pub nonce: String,
}

/// A proposed or committed block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockRequest {
    #[serde(rename = "originNodePublicKey")]
    pub origin_node_public_key: String,
    #[serde(rename = "proofOfWorkHash")]
    pub proof_of_work_hash: String,
    pub header: BlockHeader,
    pub transactions: Vec<TransactionSubmission>,
}

impl BlockRequest {
    /// Dropped blocks are local audit records; they never travel to peers and
    /// never advance the tip.
    pub fn is_dropped(&self) -> bool {
        self.proof_of_work_hash == constants::DROPPED_BLOCK_HASH
    }
}

/// One node's signature over the canonical JSON of a `BlockRequest`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSignature {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "signedBlockRequest")]
    pub signed_block_request: String,
}

/// A block plus the signatures collected for it. Element 0 is always the
/// origin node's own signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSignatures {
    pub block: BlockRequest,
    #[serde(rename = "nodeSignatures")]
    pub node_signatures: Vec<NodeSignature>,
}

/// Canonical JSON: the one byte-level encoding used for hashing and signing.
/// Compact output, struct declaration order, serde_json escaping. Every hash
/// and signature in the system is taken over bytes produced here.
pub fn canonical_json<T: Serialize>(value: &T) -> ChainResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// SHA-256 of `bytes` rendered as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time went backwards")
        .as_secs() as i64
}
