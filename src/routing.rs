//! Static controller deployment tables
//!
//! Loan and repay legs are routed through different controller deployments,
//! so each leg has its own table from controller address to chain id.

use crate::error::{RelayerError, RelayerResult};

use ethers::types::Address;
use std::collections::HashMap;

const LOAN_CONTROLLERS: &[(&str, u64)] = &[
    ("0x53f38bEA30fE6919e0475Fe57C2629f3D3754d1E", 42161),
    ("0x85dAC4da6eB28393088CF65b73bA1eA30e7e3cab", 137),
    ("0xa8BD3FfEbF92538b3b830DD5B2516A5111DB164D", 1),
];

const REPAY_CONTROLLERS: &[(&str, u64)] = &[
    ("0x9880fCd5d42e8F4c2148f2c1187Df050BE3Dbd17", 42161),
    ("0x85dAC4da6eB28393088CF65b73bA1eA30e7e3cab", 137),
    ("0xa8BD3FfEbF92538b3b830DD5B2516A5111DB164D", 1),
    ("0x1ec2Abe3F25F5d48567833Bf913f030Ec7a948Ba", 43114),
];

/// Controller address to chain id mapping
#[derive(Debug, Clone)]
pub struct ControllerTable {
    deployments: HashMap<Address, u64>,
}

impl ControllerTable {
    /// Controllers that issue loans
    pub fn loan() -> Self {
        Self::from_entries(LOAN_CONTROLLERS)
    }

    /// Controllers that accept repayments
    pub fn repay() -> Self {
        Self::from_entries(REPAY_CONTROLLERS)
    }

    fn from_entries(entries: &[(&str, u64)]) -> Self {
        let deployments = entries
            .iter()
            .filter_map(|(address, chain_id)| {
                address.parse::<Address>().ok().map(|a| (a, *chain_id))
            })
            .collect();
        Self { deployments }
    }

    /// Chain a controller is deployed on; unknown controllers are an error
    pub fn chain_id(&self, contract: Address) -> RelayerResult<u64> {
        self.deployments
            .get(&contract)
            .copied()
            .ok_or(RelayerError::UnknownController { contract })
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.deployments.len()
    }
}
