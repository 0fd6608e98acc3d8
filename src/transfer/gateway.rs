//! Deposit address derivation
//!
//! The gateway is a P2SH address whose redeem script commits to the request's
//! gHash and pays to the signing network's key:
//! `<gHash> OP_DROP OP_DUP OP_HASH160 <mpkh> OP_EQUALVERIFY OP_CHECKSIG`

use super::TransferRequest;
use crate::config::BtcNetwork;
use crate::error::{RelayerError, RelayerResult};

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

const OP_DROP: u8 = 0x75;
const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

const P2SH_MAINNET: u8 = 0x05;
const P2SH_TESTNET: u8 = 0xc4;

/// Redeem script for a request
pub fn gateway_script(request: &TransferRequest, mpkh: &[u8; 20]) -> RelayerResult<Vec<u8>> {
    let g_hash = request.g_hash()?;

    let mut script = Vec::with_capacity(1 + 32 + 3 + 1 + 20 + 2);
    script.push(32);
    script.extend_from_slice(g_hash.as_bytes());
    script.extend_from_slice(&[OP_DROP, OP_DUP, OP_HASH160]);
    script.push(20);
    script.extend_from_slice(mpkh);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    Ok(script)
}

/// Base58check P2SH deposit address for `request`
pub fn compute_gateway_address(
    request: &TransferRequest,
    mpkh: &[u8; 20],
    network: BtcNetwork,
) -> RelayerResult<String> {
    let script = gateway_script(request, mpkh)?;
    let script_hash = Ripemd160::digest(Sha256::digest(&script));

    let version = match network {
        BtcNetwork::Mainnet => P2SH_MAINNET,
        BtcNetwork::Testnet => P2SH_TESTNET,
    };

    let mut payload = Vec::with_capacity(21);
    payload.push(version);
    payload.extend_from_slice(&script_hash);
    Ok(bs58::encode(payload).with_check().into_string())
}

/// Parse a 20 byte hex public key hash
pub fn parse_mpkh(raw: &str) -> RelayerResult<[u8; 20]> {
    let bytes = hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| RelayerError::Config(format!("invalid mpkh: {}", e)))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| RelayerError::Config(format!("mpkh must be 20 bytes, got {}", b.len())))
}
