//! Chain identifiers and deployment metadata
//!
//! The protocol runs one controller per chain. This module names the chains
//! the controllers are deployed on and the transport selector each one is
//! addressed by.

use crate::ChainId;

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Ethereum Sepolia testnet (main instance)
pub const SEPOLIA: &str = "sepolia";
/// Optimism Goerli testnet
pub const OPTIMISM_GOERLI: &str = "optimism-goerli";
/// Base Goerli testnet
pub const BASE_GOERLI: &str = "base-goerli";
/// Local development chain
pub const LOCAL: &str = "local";

pub const SEPOLIA_CHAIN_ID: ChainId = 11155111;
pub const OPTIMISM_GOERLI_CHAIN_ID: ChainId = 420;
pub const BASE_GOERLI_CHAIN_ID: ChainId = 84531;
pub const LOCAL_CHAIN_ID: ChainId = 31337;

/// Default transport gas limit for remote execution
pub const DEFAULT_TRANSPORT_GAS_LIMIT: u64 = 500_000;

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN INFO
// ═══════════════════════════════════════════════════════════════════════════════

/// Chain information structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    /// Short identifier
    pub chain_name: &'static str,
    /// Human-readable chain name
    pub display_name: &'static str,
    /// EVM chain id
    pub chain_id: ChainId,
    /// Selector the message transport uses for this chain
    pub transport_selector: u64,
    /// Gas limit requested for remote execution when the caller gives none
    pub default_transport_gas: u64,
    /// Whether this is a test network
    pub testnet: bool,
}

/// Get chain info by chain id
pub fn get_chain_info(chain_id: ChainId) -> Option<ChainInfo> {
    match chain_id {
        SEPOLIA_CHAIN_ID => Some(ChainInfo {
            chain_name: SEPOLIA,
            display_name: "Ethereum Sepolia",
            chain_id: SEPOLIA_CHAIN_ID,
            transport_selector: 16015286601757825753,
            default_transport_gas: DEFAULT_TRANSPORT_GAS_LIMIT,
            testnet: true,
        }),
        OPTIMISM_GOERLI_CHAIN_ID => Some(ChainInfo {
            chain_name: OPTIMISM_GOERLI,
            display_name: "Optimism Goerli",
            chain_id: OPTIMISM_GOERLI_CHAIN_ID,
            transport_selector: 2664363617261496610,
            default_transport_gas: DEFAULT_TRANSPORT_GAS_LIMIT,
            testnet: true,
        }),
        BASE_GOERLI_CHAIN_ID => Some(ChainInfo {
            chain_name: BASE_GOERLI,
            display_name: "Base Goerli",
            chain_id: BASE_GOERLI_CHAIN_ID,
            transport_selector: 5790810961207155433,
            default_transport_gas: DEFAULT_TRANSPORT_GAS_LIMIT,
            testnet: true,
        }),
        LOCAL_CHAIN_ID => Some(ChainInfo {
            chain_name: LOCAL,
            display_name: "Local Devnet",
            chain_id: LOCAL_CHAIN_ID,
            transport_selector: LOCAL_CHAIN_ID,
            default_transport_gas: DEFAULT_TRANSPORT_GAS_LIMIT,
            testnet: true,
        }),
        _ => None,
    }
}

/// Get chain info by short name
pub fn get_chain_info_by_name(chain_name: &str) -> Option<ChainInfo> {
    let chain_id = match chain_name {
        SEPOLIA => SEPOLIA_CHAIN_ID,
        OPTIMISM_GOERLI => OPTIMISM_GOERLI_CHAIN_ID,
        BASE_GOERLI => BASE_GOERLI_CHAIN_ID,
        LOCAL => LOCAL_CHAIN_ID,
        _ => return None,
    };
    get_chain_info(chain_id)
}

/// The chains the protocol is deployed on, main instance first
pub fn deployed_chains() -> Vec<ChainInfo> {
    [SEPOLIA_CHAIN_ID, OPTIMISM_GOERLI_CHAIN_ID, BASE_GOERLI_CHAIN_ID]
        .into_iter()
        .filter_map(get_chain_info)
        .collect()
}

/// Display name for a chain id, falling back to the bare number
pub fn display_name(chain_id: ChainId) -> String {
    get_chain_info(chain_id)
        .map(|c| c.display_name.to_string())
        .unwrap_or_else(|| format!("chain-{}", chain_id))
}
