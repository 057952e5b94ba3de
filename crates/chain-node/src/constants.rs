/// Bounded queue of accepted, un-batched transaction submissions.
pub const MEMPOOL_CAPACITY: usize = 100;
/// The committer is the sole consumer; one block in flight at a time.
pub const COMMIT_CAPACITY: usize = 1;
/// Mining attempts per batch before the batch is dropped.
pub const MAX_MINING_RETRIES: usize = 10;
/// The local node ports tried in order when no host is configured; also the
/// default static peer set.
pub const LOCALHOST_PORTS: [u16; 7] = [8080, 8081, 8082, 8083, 8084, 8085, 8086];
/// Peer request deadline. Must stay above the 120 s sign-claim window so a
/// peer mid-proof is not cut off.
pub const PEER_REQUEST_TIMEOUT_SECS: u64 = 150;
/// Deadline for the startup healthcheck probe of a local port.
pub const PROBE_TIMEOUT_SECS: u64 = 2;
