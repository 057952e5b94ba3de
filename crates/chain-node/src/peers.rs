//! The two-phase peer protocol: collect signatures, then distribute the
//! multi-signed block for commit. The peer set sits behind a small capability
//! trait so tests can substitute an in-process network.

use std::time::Duration;

use async_trait::async_trait;
use chain_core::{NodeSignature, NodeSignatures};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::PEER_REQUEST_TIMEOUT_SECS;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct PeerError(pub String);

#[async_trait]
pub trait PeerNetwork: Send + Sync {
    fn peer_urls(&self) -> Vec<String>;
    async fn post_sign(
        &self,
        peer_url: &str,
        request: &NodeSignatures,
    ) -> Result<NodeSignatures, PeerError>;
    async fn post_block(&self, peer_url: &str, request: &NodeSignatures) -> Result<(), PeerError>;
}

/// The static localhost peer set, with this node's own port excluded.
pub struct HttpPeers {
    client: reqwest::Client,
    base_urls: Vec<String>,
}

impl HttpPeers {
    pub fn from_ports(ports: &[u16], self_port: Option<u16>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PEER_REQUEST_TIMEOUT_SECS))
            .build()?;
        let base_urls = ports
            .iter()
            .filter(|port| Some(**port) != self_port)
            .map(|port| format!("http://127.0.0.1:{port}"))
            .collect();
        Ok(Self { client, base_urls })
    }
}

#[async_trait]
impl PeerNetwork for HttpPeers {
    fn peer_urls(&self) -> Vec<String> {
        self.base_urls.clone()
    }

    async fn post_sign(
        &self,
        peer_url: &str,
        request: &NodeSignatures,
    ) -> Result<NodeSignatures, PeerError> {
        let response = self
            .client
            .post(format!("{peer_url}/block-sign"))
            .json(request)
            .send()
            .await
            .map_err(|err| PeerError(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| PeerError(err.to_string()))?;
        if status != StatusCode::OK {
            return Err(PeerError(body));
        }
        serde_json::from_str(&body).map_err(|err| PeerError(err.to_string()))
    }

    async fn post_block(&self, peer_url: &str, request: &NodeSignatures) -> Result<(), PeerError> {
        let response = self
            .client
            .post(format!("{peer_url}/block"))
            .json(request)
            .send()
            .await
            .map_err(|err| PeerError(err.to_string()))?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PeerError(body));
        }
        Ok(())
    }
}

/// Phase A: ask every peer to countersign. A peer rejects on transport
/// failure, non-200, an unparsable body, or a body missing its signature;
/// otherwise the appended signature is accumulated. Fails only when the
/// rejection percentage reaches `reject_percent`, returning the last error.
pub async fn collect_signatures(
    network: &dyn PeerNetwork,
    request: &NodeSignatures,
    reject_percent: u32,
) -> anyhow::Result<Vec<NodeSignature>> {
    let peers = network.peer_urls();
    if peers.is_empty() {
        return Ok(Vec::new());
    }
    let mut collected = Vec::new();
    let mut rejected = 0u32;
    let mut last_error: Option<PeerError> = None;
    for peer in &peers {
        match network.post_sign(peer, request).await {
            Ok(signed) if signed.node_signatures.len() >= 2 => {
                debug!(peer, "signature collected");
                // our own signature is element 0, the peer's is element 1
                collected.push(signed.node_signatures[1].clone());
            }
            Ok(_) => {
                warn!(peer, "peer response is missing its signature");
                rejected += 1;
            }
            Err(err) => {
                warn!(peer, error = %err, "not signed by peer");
                rejected += 1;
                last_error = Some(err);
            }
        }
    }
    if rejected * 100 / peers.len() as u32 >= reject_percent {
        anyhow::bail!(last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no peer returned a signature".to_string()));
    }
    Ok(collected)
}

/// Phase B: distribute the multi-signed block to every peer's `/block`.
/// Same rejection-percentage rule as phase A.
pub async fn distribute(
    network: &dyn PeerNetwork,
    request: &NodeSignatures,
    reject_percent: u32,
) -> anyhow::Result<()> {
    let peers = network.peer_urls();
    if peers.is_empty() {
        return Ok(());
    }
    let mut rejected = 0u32;
    let mut last_error: Option<PeerError> = None;
    for peer in &peers {
        if let Err(err) = network.post_block(peer, request).await {
            warn!(peer, error = %err, "block not accepted by peer");
            rejected += 1;
            last_error = Some(err);
        }
    }
    if rejected * 100 / peers.len() as u32 >= reject_percent {
        anyhow::bail!(last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no peer accepted the block".to_string()));
    }
    Ok(())
}

/// Run both phases, folding the collected signatures into `request` between
/// them. On success the miner treats the block as committed network-wide.
pub async fn sign_and_distribute(
    network: &dyn PeerNetwork,
    request: &mut NodeSignatures,
    sign_reject_percent: u32,
    commit_reject_percent: u32,
) -> anyhow::Result<()> {
    let collected = collect_signatures(network, request, sign_reject_percent).await?;
    request.node_signatures.extend(collected);
    distribute(network, request, commit_reject_percent).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_core::{BlockHeader, BlockRequest};

    struct ScriptedPeers {
        /// per-peer: Some(reply) to sign, None to reject
        sign_replies: Vec<Option<NodeSignatures>>,
        accept_blocks: Vec<bool>,
    }

    fn request() -> NodeSignatures {
        NodeSignatures {
            block: BlockRequest {
                origin_node_public_key: "origin-pem".into(),
                proof_of_work_hash: "00000abc".into(),
                header: BlockHeader::default(),
                transactions: vec![],
            },
            node_signatures: vec![NodeSignature {
                public_key: "origin-pem".into(),
                signed_block_request: "aa".into(),
            }],
        }
    }

    fn countersigned(by: &str) -> NodeSignatures {
        let mut reply = request();
        reply.node_signatures.push(NodeSignature {
            public_key: by.into(),
            signed_block_request: "bb".into(),
        });
        reply
    }

    #[async_trait]
    impl PeerNetwork for ScriptedPeers {
        fn peer_urls(&self) -> Vec<String> {
            (0..self.sign_replies.len())
                .map(|i| format!("http://peer-{i}"))
                .collect()
        }

        async fn post_sign(
            &self,
            peer_url: &str,
            _request: &NodeSignatures,
        ) -> Result<NodeSignatures, PeerError> {
            let i: usize = peer_url.rsplit('-').next().unwrap().parse().unwrap();
            self.sign_replies[i]
                .clone()
                .ok_or_else(|| PeerError("rejected".into()))
        }

        async fn post_block(
            &self,
            peer_url: &str,
            _request: &NodeSignatures,
        ) -> Result<(), PeerError> {
            let i: usize = peer_url.rsplit('-').next().unwrap().parse().unwrap();
            if self.accept_blocks[i] {
                Ok(())
            } else {
                Err(PeerError("not accepted".into()))
            }
        }
    }

    #[tokio::test]
    async fn one_signer_is_enough_at_the_default_threshold() {
        let network = ScriptedPeers {
            sign_replies: vec![Some(countersigned("peer-pem")), None, None],
            accept_blocks: vec![true, false, false],
        };
        let mut req = request();
        sign_and_distribute(&network, &mut req, 100, 100)
            .await
            .unwrap();
        assert_eq!(req.node_signatures.len(), 2);
        assert_eq!(req.node_signatures[0].public_key, "origin-pem");
        assert_eq!(req.node_signatures[1].public_key, "peer-pem");
    }

    #[tokio::test]
    async fn unanimous_rejection_fails_with_the_last_error() {
        let network = ScriptedPeers {
            sign_replies: vec![None, None],
            accept_blocks: vec![false, false],
        };
        let err = collect_signatures(&network, &request(), 100)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "rejected");
    }

    #[tokio::test]
    async fn responses_without_a_second_signature_count_as_rejections() {
        let network = ScriptedPeers {
            sign_replies: vec![Some(request())], // echoed back unsigned
            accept_blocks: vec![true],
        };
        assert!(collect_signatures(&network, &request(), 100).await.is_err());
    }

    #[tokio::test]
    async fn lower_thresholds_fail_on_partial_rejection() {
        let network = ScriptedPeers {
            sign_replies: vec![Some(countersigned("peer-pem")), None],
            accept_blocks: vec![true, true],
        };
        // one of two peers rejected: fine at 100%, fatal at 50%
        assert!(collect_signatures(&network, &request(), 100).await.is_ok());
        assert!(collect_signatures(&network, &request(), 50).await.is_err());
    }

    #[tokio::test]
    async fn an_empty_peer_set_commits_immediately() {
        let network = ScriptedPeers {
            sign_replies: vec![],
            accept_blocks: vec![],
        };
        let mut req = request();
        sign_and_distribute(&network, &mut req, 100, 100)
            .await
            .unwrap();
        assert_eq!(req.node_signatures.len(), 1);
    }
}
