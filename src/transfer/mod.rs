//! Transfer requests and the jobs derived from them
//!
//! A `TransferRequest` is created by a user, sits in the pending queue until
//! its deposit confirms, then travels inside `WatchJob`s. `DispatchJob`s are
//! the transaction intents both watchers hand to the dispatcher.

mod calldata;
mod gateway;

pub use calldata::{encode_loan, encode_repay};
pub use gateway::{compute_gateway_address, parse_mpkh};

use crate::error::{RelayerError, RelayerResult};

use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, Signature, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

const DOMAIN_NAME: &str = "ZeroController";
const DOMAIN_VERSION: &str = "1";
const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const TRANSFER_REQUEST_TYPE: &str = "TransferRequest(address asset,uint256 amount,address underwriter,address module,uint256 nonce,bytes data)";

/// One cross-chain transfer intent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub asset: Address,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub p_nonce: H256,
    pub nonce: H256,
    pub module: Address,
    pub data: Bytes,
    /// Authorization by the destination account, not the settlement signature
    pub signature: Bytes,
    pub contract_address: Address,
    pub underwriter: Address,
    /// Chain the authorization was signed for
    pub chain_id: u64,
}

impl TransferRequest {
    /// EIP-712 digest the user signed
    pub fn typed_data_hash(&self) -> H256 {
        let struct_hash = keccak256(encode(&[
            Token::FixedBytes(keccak256(TRANSFER_REQUEST_TYPE).to_vec()),
            Token::Address(self.asset),
            Token::Uint(self.amount),
            Token::Address(self.underwriter),
            Token::Address(self.module),
            Token::Uint(U256::from_big_endian(self.nonce.as_bytes())),
            Token::FixedBytes(keccak256(&self.data).to_vec()),
        ]));

        let domain_separator = keccak256(encode(&[
            Token::FixedBytes(keccak256(DOMAIN_TYPE).to_vec()),
            Token::FixedBytes(keccak256(DOMAIN_NAME).to_vec()),
            Token::FixedBytes(keccak256(DOMAIN_VERSION).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(self.contract_address),
        ]));

        let mut preimage = Vec::with_capacity(66);
        preimage.extend_from_slice(&[0x19, 0x01]);
        preimage.extend_from_slice(&domain_separator);
        preimage.extend_from_slice(&struct_hash);
        H256::from(keccak256(preimage))
    }

    /// Account the loan is paid out to: the signer of the request
    pub fn destination(&self) -> RelayerResult<Address> {
        let raw = self.signature.to_vec();
        let signature = Signature::try_from(raw.as_slice())
            .map_err(|e| RelayerError::InvalidRequest(format!("bad signature: {}", e)))?;
        signature
            .recover(self.typed_data_hash())
            .map_err(|e| RelayerError::InvalidRequest(format!("cannot recover signer: {}", e)))
    }

    /// Hash binding the payload to its destination
    pub fn p_hash(&self) -> RelayerResult<H256> {
        let encoded = encode(&[
            Token::Address(self.destination()?),
            Token::Uint(self.p_nonce_uint()),
            Token::Address(self.module),
            Token::Bytes(self.data.to_vec()),
        ]);
        Ok(H256::from(keccak256(encoded)))
    }

    /// Hash committed to by the gateway script
    pub fn g_hash(&self) -> RelayerResult<H256> {
        let packed = ethers::abi::encode_packed(&[
            Token::FixedBytes(self.p_hash()?.as_bytes().to_vec()),
            Token::Address(self.asset),
            Token::Address(self.destination()?),
            Token::FixedBytes(self.nonce.as_bytes().to_vec()),
        ])
        .map_err(|e| RelayerError::Encoding(e.to_string()))?;
        Ok(H256::from(keccak256(packed)))
    }

    pub(crate) fn p_nonce_uint(&self) -> U256 {
        U256::from_big_endian(self.p_nonce.as_bytes())
    }
}

/// A confirmed deposit waiting for its settlement signature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchJob {
    pub block_number: u64,
    pub transfer_request: TransferRequest,
}

/// A transaction intent for the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchJob {
    pub to: Address,
    pub data: Bytes,
    /// Routing metadata, never part of the submitted transaction
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl DispatchJob {
    pub fn new(to: Address, data: Bytes, chain_id: u64) -> Self {
        Self {
            to,
            data,
            chain_id,
            attempts: 0,
            last_error: None,
        }
    }

    /// Same intent with one more failed attempt recorded
    pub fn retried(&self, error: &RelayerError) -> Self {
        Self {
            attempts: self.attempts + 1,
            last_error: Some(error.to_string()),
            ..self.clone()
        }
    }

    /// True when both jobs would submit the same transaction
    #[cfg(test)]
    pub fn same_intent(&self, other: &DispatchJob) -> bool {
        self.to == other.to && self.data == other.data && self.chain_id == other.chain_id
    }
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Settlement attestation from the signing network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignatureResult {
    pub signature: Bytes,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub n_hash: H256,
    pub p_hash: H256,
}

/// Amounts as decimal strings; decimal strings, hex strings and numbers are accepted
mod u256_dec {
    use ethers::types::U256;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(U256::from(n)),
            Raw::Text(s) => match s.strip_prefix("0x") {
                Some(hex) => U256::from_str_radix(hex, 16).map_err(D::Error::custom),
                None => U256::from_dec_str(&s).map_err(D::Error::custom),
            },
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use ethers::signers::Signer;

    #[test]
    fn test_destination_is_request_signer() {
        let request = signed_request(polygon_controller());
        assert_eq!(request.destination().unwrap(), user().address());
    }

    #[test]
    fn test_tampered_request_recovers_someone_else() {
        let mut request = signed_request(polygon_controller());
        request.amount = U256::from(1u64);
        assert_ne!(request.destination().unwrap(), user().address());
    }

    #[test]
    fn test_missing_signature_is_invalid() {
        let mut request = signed_request(polygon_controller());
        request.signature = Bytes::default();
        assert!(matches!(
            request.destination(),
            Err(RelayerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_g_hash_commits_to_p_nonce() {
        let request = signed_request(polygon_controller());
        let mut other = request.clone();
        // outside the signed struct, so the destination stays the same
        other.p_nonce = H256::repeat_byte(0x33);
        assert_eq!(request.destination().unwrap(), other.destination().unwrap());
        assert_ne!(request.g_hash().unwrap(), other.g_hash().unwrap());
    }

    #[test]
    fn test_json_shape_is_camel_case() {
        let request = signed_request(polygon_controller());
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["amount"], "100000");
        assert!(json.get("pNonce").is_some());
        assert!(json.get("contractAddress").is_some());

        let watch = WatchJob {
            block_number: 800_000,
            transfer_request: request,
        };
        let json = serde_json::to_value(&watch).unwrap();
        assert_eq!(json["blockNumber"], 800_000);
        assert!(json.get("transferRequest").is_some());
    }

    #[test]
    fn test_amount_accepts_number_and_hex() {
        let request = signed_request(polygon_controller());
        let mut json = serde_json::to_value(&request).unwrap();

        json["amount"] = serde_json::json!(42);
        let parsed: TransferRequest = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(parsed.amount, U256::from(42u64));

        json["amount"] = serde_json::json!("0x2a");
        let parsed: TransferRequest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.amount, U256::from(42u64));
    }

    #[test]
    fn test_dispatch_job_envelope_fields_are_optional() {
        let job: DispatchJob = serde_json::from_str(
            r#"{"to":"0x85dac4da6eb28393088cf65b73ba1ea30e7e3cab","data":"0x1234","chainId":137}"#,
        )
        .unwrap();
        assert_eq!(job.attempts, 0);
        assert_eq!(job.last_error, None);

        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("attempts").is_none());

        let retried = job.retried(&RelayerError::Transaction("nonce collision".to_string()));
        assert_eq!(retried.attempts, 1);
        assert!(retried.same_intent(&job));
    }
}
