//! Generic call execution from a wallet.
//!
//! The protocol's own operations (fund, settle, create) are typed commands on
//! the controller. Everything an owner asks their wallet to do is an opaque
//! `(target, value, payload)` call handed to a [`CallExecutor`].

use std::collections::HashSet;

use ayara_gmp::{Address, Amount, ChainId};
use serde::{Deserialize, Serialize};

/// A call made by a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletCall {
    pub chain_id: ChainId,
    pub wallet: Address,
    pub target: Address,
    pub value: Amount,
    #[serde(with = "ayara_gmp::serde_hex")]
    pub payload: Vec<u8>,
}

/// Result of a generic call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub success: bool,
    #[serde(with = "ayara_gmp::serde_hex")]
    pub return_data: Vec<u8>,
}

impl CallOutcome {
    pub fn succeeded(return_data: Vec<u8>) -> Self {
        Self {
            success: true,
            return_data,
        }
    }

    pub fn reverted(reason: impl Into<Vec<u8>>) -> Self {
        Self {
            success: false,
            return_data: reason.into(),
        }
    }
}

/// Executes wallet calls. A revert is an outcome, not an error: the
/// controller still commits the nonce and the fee charge.
pub trait CallExecutor: Send {
    fn execute(&mut self, call: &WalletCall) -> CallOutcome;
}

/// In-memory executor that records every call and reverts those aimed at a
/// configurable set of targets.
#[derive(Debug, Clone, Default)]
pub struct SimulatedExecutor {
    reverting: HashSet<Address>,
    calls: Vec<WalletCall>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `target` revert.
    pub fn revert_on(&mut self, target: Address) {
        self.reverting.insert(target);
    }

    pub fn clear_reverts(&mut self) {
        self.reverting.clear();
    }

    /// Calls executed so far, including reverted ones
    pub fn calls(&self) -> &[WalletCall] {
        &self.calls
    }
}

impl CallExecutor for SimulatedExecutor {
    fn execute(&mut self, call: &WalletCall) -> CallOutcome {
        self.calls.push(call.clone());
        if self.reverting.contains(&call.target) {
            return CallOutcome::reverted(b"execution reverted".to_vec());
        }
        CallOutcome::succeeded(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(target: Address) -> WalletCall {
        WalletCall {
            chain_id: 420,
            wallet: Address([0x01; 20]),
            target,
            value: 0,
            payload: vec![0xde, 0xad],
        }
    }

    #[test]
    fn test_reverting_target() {
        let bad = Address([0xbb; 20]);
        let mut executor = SimulatedExecutor::new();
        executor.revert_on(bad);

        assert!(executor.execute(&call(Address([0xaa; 20]))).success);
        assert!(!executor.execute(&call(bad)).success);
        assert_eq!(executor.calls().len(), 2);

        executor.clear_reverts();
        assert!(executor.execute(&call(bad)).success);
    }
}
