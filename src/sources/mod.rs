//! External collaborators the pipeline polls
//!
//! - `UtxoSource`: deposit detection on the UTXO chain
//! - `SignatureSource`: settlement signatures from the threshold-signing network

pub mod signing;
pub mod utxo;

pub use signing::{await_signature, HttpSignatureSource, SignatureOutcome, SignatureSource};
pub use utxo::{EsploraClient, UtxoSource};
