//! Settlement signatures from the threshold-signing network

use crate::error::{RelayerError, RelayerResult};
use crate::transfer::{SignatureResult, TransferRequest};

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Produces the settlement signature for a transfer request
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignatureSource: Send + Sync {
    /// Resolves once the network has signed; may take arbitrarily long
    async fn wait_for_signature(&self, request: &TransferRequest)
        -> RelayerResult<SignatureResult>;
}

/// How a bounded signature wait ended
#[derive(Debug)]
pub enum SignatureOutcome {
    Signed(SignatureResult),
    TimedOut,
    NetworkError(RelayerError),
}

/// Wait for a signature, giving up after `limit`
pub async fn await_signature(
    source: &dyn SignatureSource,
    request: &TransferRequest,
    limit: Duration,
) -> SignatureOutcome {
    match timeout(limit, source.wait_for_signature(request)).await {
        Ok(Ok(result)) => SignatureOutcome::Signed(result),
        Ok(Err(e)) => SignatureOutcome::NetworkError(e),
        Err(_) => SignatureOutcome::TimedOut,
    }
}

/// Polls a signing-network gateway at `GET {base}/signatures/{gHash}`.
/// 200 carries the `SignatureResult`, 404 means not signed yet.
pub struct HttpSignatureSource {
    base_url: String,
    poll_interval: Duration,
    http: reqwest::Client,
}

impl HttpSignatureSource {
    pub fn new(base_url: &str, poll_interval: Duration) -> RelayerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RelayerError::SigningNetwork(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
            http,
        })
    }

    async fn query(&self, url: &str) -> RelayerResult<Option<SignatureResult>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RelayerError::SigningNetwork(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<SignatureResult>()
                .await
                .map(Some)
                .map_err(|e| RelayerError::SigningNetwork(format!("bad signature body: {}", e))),
            status => Err(RelayerError::SigningNetwork(format!(
                "{} returned {}",
                url, status
            ))),
        }
    }
}

#[async_trait]
impl SignatureSource for HttpSignatureSource {
    async fn wait_for_signature(
        &self,
        request: &TransferRequest,
    ) -> RelayerResult<SignatureResult> {
        let g_hash = request.g_hash()?;
        let url = format!("{}/signatures/0x{}", self.base_url, hex::encode(g_hash));

        loop {
            match self.query(&url).await {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => debug!("Signature for {:?} not ready", g_hash),
                // Transient gateway hiccups should not end the wait
                Err(e) => warn!("Signature poll for {:?} failed: {}", g_hash, e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::fixtures::*;
    use ethers::types::{Bytes, H256, U256};

    fn result() -> SignatureResult {
        SignatureResult {
            signature: Bytes::from(vec![1u8; 65]),
            amount: U256::from(99_000u64),
            n_hash: H256::repeat_byte(0x44),
            p_hash: H256::repeat_byte(0x55),
        }
    }

    #[tokio::test]
    async fn test_signed_outcome() {
        let mut source = MockSignatureSource::new();
        source
            .expect_wait_for_signature()
            .returning(|_| Ok(result()));

        let request = signed_request(polygon_controller());
        let outcome = await_signature(&source, &request, Duration::from_secs(1)).await;
        assert!(matches!(outcome, SignatureOutcome::Signed(r) if r == result()));
    }

    #[tokio::test]
    async fn test_network_error_outcome() {
        let mut source = MockSignatureSource::new();
        source
            .expect_wait_for_signature()
            .returning(|_| Err(RelayerError::SigningNetwork("connection refused".to_string())));

        let request = signed_request(polygon_controller());
        let outcome = await_signature(&source, &request, Duration::from_secs(1)).await;
        assert!(matches!(outcome, SignatureOutcome::NetworkError(_)));
    }

    struct NeverSigns;

    #[async_trait]
    impl SignatureSource for NeverSigns {
        async fn wait_for_signature(&self, _: &TransferRequest) -> RelayerResult<SignatureResult> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_timeout_outcome() {
        let request = signed_request(polygon_controller());
        let outcome = await_signature(&NeverSigns, &request, Duration::from_millis(20)).await;
        assert!(matches!(outcome, SignatureOutcome::TimedOut));
    }

    #[test]
    fn test_signature_result_wire_shape() {
        let parsed: SignatureResult = serde_json::from_str(&format!(
            r#"{{"signature":"0x{}","amount":"99000","nHash":"0x{}","pHash":"0x{}"}}"#,
            "01".repeat(65),
            "44".repeat(32),
            "55".repeat(32)
        ))
        .unwrap();
        assert_eq!(parsed, result());
    }
}
