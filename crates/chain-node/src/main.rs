use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chain_core::crypto::NodeKeys;
use chain_core::tip::ChainTip;
use chain_node::committer::Committer;
use chain_node::miner::Miner;
use chain_node::peers::{HttpPeers, PeerNetwork};
use chain_node::{batcher, constants, router, AppState};
use chain_storage::{BlockStore, SearchIndex};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chain-node")]
#[command(about = "Handle and make requests to the network as a full node")]
struct Args {
    /// Maximum number of transactions per block
    #[arg(long, env = "MAX_TRANSACTIONS", default_value_t = 500)]
    max_transactions: usize,

    /// Time limit in minutes for filling a block
    #[arg(long, env = "TIME_LIMIT", default_value_t = 10)]
    time_limit: u64,

    /// Host endpoint of the node ("host:port"); when empty, the local node
    /// ports are probed and the first free one is taken
    #[arg(long, env = "HOST", default_value = "")]
    host: String,

    /// Folder the blockchain files are written to
    #[arg(long, env = "BLOCKCHAIN_FOLDER_NAME", default_value = "written")]
    blockchain_folder_name: String,

    /// RSA key size in bits (2048 minimum)
    #[arg(long, env = "KEY_BITS", default_value_t = 2048)]
    key_bits: usize,

    /// Comma-separated localhost ports forming the static peer set
    #[arg(long, env = "PEER_PORTS", value_delimiter = ',', default_values_t = constants::LOCALHOST_PORTS)]
    peer_ports: Vec<u16>,

    /// Rejection percentage at or above which signature collection fails
    #[arg(long, env = "SIGN_REJECT_PERCENT", default_value_t = 100)]
    sign_reject_percent: u32,

    /// Rejection percentage at or above which block distribution fails
    #[arg(long, env = "COMMIT_REJECT_PERCENT", default_value_t = 100)]
    commit_reject_percent: u32,
}

/// Resolve the bind address, chain folder, and own port. With no configured
/// host, take the first local node port whose healthcheck does not answer and
/// suffix the folder with it (e.g. `written8081`).
async fn resolve_host(args: &Args) -> anyhow::Result<(String, String, Option<u16>)> {
    if !args.host.is_empty() {
        let self_port = args
            .host
            .rsplit(':')
            .next()
            .and_then(|port| port.parse().ok());
        return Ok((
            args.host.clone(),
            args.blockchain_folder_name.clone(),
            self_port,
        ));
    }

    let probe = reqwest::Client::builder()
        .timeout(Duration::from_secs(constants::PROBE_TIMEOUT_SECS))
        .build()?;
    for &port in &constants::LOCALHOST_PORTS {
        let url = format!("http://127.0.0.1:{port}/healthcheck");
        if probe.get(&url).send().await.is_ok() {
            // another node already answers here
            continue;
        }
        let folder = format!("{}{}", args.blockchain_folder_name, port);
        return Ok((format!("127.0.0.1:{port}"), folder, Some(port)));
    }
    anyhow::bail!("all local node ports are taken")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let (bind_addr, folder, self_port) = resolve_host(&args).await?;

    info!(bits = args.key_bits, "generating the node key pair");
    let keys = Arc::new(NodeKeys::generate(args.key_bits)?);

    let tip = Arc::new(ChainTip::new());
    let store = BlockStore::new(&folder);
    let index = Arc::new(SearchIndex::new(store.clone()));

    let (tran_tx, tran_rx) = mpsc::channel(constants::MEMPOOL_CAPACITY);
    let (batch_tx, batch_rx) = mpsc::channel(1);
    let (write_tx, write_rx) = mpsc::channel(constants::COMMIT_CAPACITY);

    batcher::spawn(tran_rx, batch_tx, args.max_transactions, args.time_limit);

    let network: Arc<dyn PeerNetwork> =
        Arc::new(HttpPeers::from_ports(&args.peer_ports, self_port)?);
    let miner = Miner {
        tip: tip.clone(),
        index: index.clone(),
        keys: keys.clone(),
        network,
        write_tx: write_tx.clone(),
        sign_reject_percent: args.sign_reject_percent,
        commit_reject_percent: args.commit_reject_percent,
    };
    tokio::spawn(miner.run(batch_rx));

    let committer = Committer {
        tip: tip.clone(),
        index: index.clone(),
        store,
    };
    tokio::spawn(committer.run(write_rx));

    let state = Arc::new(AppState {
        keys,
        tip,
        index,
        tran_tx,
        write_tx,
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("could not bind {bind_addr}"))?;
    info!(folder, "listening on http://{bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
