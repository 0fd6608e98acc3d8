//! Controller calldata for the loan and repay legs

use super::{SignatureResult, TransferRequest};
use crate::error::{RelayerError, RelayerResult};

use ethers::abi::{parse_abi, Abi, Token};
use ethers::types::Bytes;

const CONTROLLER_ABI: &[&str] = &[
    "function loan(address,address,uint256,uint256,address,bytes,bytes)",
    "function repay(address,address,address,uint256,uint256,uint256,address,bytes32,bytes,bytes)",
];

fn encode_call(name: &str, tokens: &[Token]) -> RelayerResult<Bytes> {
    let abi: Abi = parse_abi(CONTROLLER_ABI).map_err(|e| RelayerError::Encoding(e.to_string()))?;
    let function = abi
        .function(name)
        .map_err(|e| RelayerError::Encoding(e.to_string()))?;
    let data = function
        .encode_input(tokens)
        .map_err(|e| RelayerError::Encoding(e.to_string()))?;
    Ok(Bytes::from(data))
}

/// `loan(to, asset, amount, pNonce, module, data, userSignature)`
pub fn encode_loan(request: &TransferRequest) -> RelayerResult<Bytes> {
    encode_call(
        "loan",
        &[
            Token::Address(request.destination()?),
            Token::Address(request.asset),
            Token::Uint(request.amount),
            Token::Uint(request.p_nonce_uint()),
            Token::Address(request.module),
            Token::Bytes(request.data.to_vec()),
            Token::Bytes(request.signature.to_vec()),
        ],
    )
}

/// `repay(underwriter, to, asset, amount, actualAmount, pNonce, module, nHash, data, signature)`
pub fn encode_repay(request: &TransferRequest, result: &SignatureResult) -> RelayerResult<Bytes> {
    encode_call(
        "repay",
        &[
            Token::Address(request.underwriter),
            Token::Address(request.destination()?),
            Token::Address(request.asset),
            Token::Uint(request.amount),
            Token::Uint(result.amount),
            Token::Uint(request.p_nonce_uint()),
            Token::Address(request.module),
            Token::FixedBytes(result.n_hash.as_bytes().to_vec()),
            Token::Bytes(request.data.to_vec()),
            Token::Bytes(result.signature.to_vec()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::fixtures::*;
    use ethers::abi::ParamType;
    use ethers::signers::Signer;
    use ethers::types::{H256, U256};
    use ethers::utils::id;

    #[test]
    fn test_loan_selector_and_arguments() {
        let request = signed_request(polygon_controller());
        let data = encode_loan(&request).unwrap();

        assert_eq!(
            &data[..4],
            &id("loan(address,address,uint256,uint256,address,bytes,bytes)")[..]
        );

        let args = ethers::abi::decode(
            &[
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Address,
                ParamType::Bytes,
                ParamType::Bytes,
            ],
            &data[4..],
        )
        .unwrap();
        assert_eq!(args[0], Token::Address(user().address()));
        assert_eq!(args[2], Token::Uint(U256::from(100_000u64)));
        assert_eq!(args[6], Token::Bytes(request.signature.to_vec()));
    }

    #[test]
    fn test_repay_carries_settlement_fields() {
        let request = signed_request(polygon_controller());
        let result = SignatureResult {
            signature: Bytes::from(vec![0xab; 65]),
            amount: U256::from(99_000u64),
            n_hash: H256::repeat_byte(0x44),
            p_hash: H256::repeat_byte(0x55),
        };
        let data = encode_repay(&request, &result).unwrap();

        assert_eq!(
            &data[..4],
            &id("repay(address,address,address,uint256,uint256,uint256,address,bytes32,bytes,bytes)")[..]
        );

        let args = ethers::abi::decode(
            &[
                ParamType::Address,
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Address,
                ParamType::FixedBytes(32),
                ParamType::Bytes,
                ParamType::Bytes,
            ],
            &data[4..],
        )
        .unwrap();
        assert_eq!(args[0], Token::Address(request.underwriter));
        assert_eq!(args[4], Token::Uint(U256::from(99_000u64)));
        assert_eq!(args[7], Token::FixedBytes(vec![0x44; 32]));
        assert_eq!(args[9], Token::Bytes(vec![0xab; 65]));
    }
}
