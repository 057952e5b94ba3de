/// Required prefix of a block's proof-of-work hash in lowercase hex.
pub const DIFFICULTY_PREFIX: &str = "00000";
/// Length of a transaction id (hex SHA-256).
pub const TRANSACTION_ID_LEN: usize = 64;
/// Seconds a sign-initiated claim may be held before it is force-released.
pub const CLAIM_TIMEOUT_SECS: u64 = 120;
/// `proofOfWorkHash` sentinel for a locally dropped block.
pub const DROPPED_BLOCK_HASH: &str = "dropped";
/// `prev-block-hash` sentinel written into dropped blocks.
pub const SCRUBBED_PREV_HASH: &str = "scrubbed";
/// The tip before any block has been committed.
pub const GENESIS_PREV_HASH: &str = "";
/// RSA key size floor; smaller keys are refused at startup.
pub const MIN_KEY_BITS: usize = 2048;
pub const DEFAULT_KEY_BITS: usize = 2048;
