//! Configuration types for Ayara controllers.

use anyhow::{bail, Context};
use ayara_gmp::chains::{self, DEFAULT_TRANSPORT_GAS_LIMIT};
use ayara_gmp::{Address, ChainId};
use serde::{Deserialize, Serialize};

/// Prefix of environment variables overriding the network config.
pub const ENV_PREFIX: &str = "AYARA";

/// Label of the default gas token.
pub const DEFAULT_GAS_TOKEN_LABEL: &str = "ayara-gas-token";

/// Label of the default protocol admin.
pub const DEFAULT_ADMIN_LABEL: &str = "ayara-admin";

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROLLER CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration of one chain instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Chain the controller runs on.
    pub chain_id: ChainId,

    /// Short chain name.
    #[serde(default)]
    pub chain_name: String,

    /// Address of the controller on its chain.
    pub controller_address: Address,

    /// Account allowed to modify the gas-token allow-list.
    pub admin: Address,

    /// Wallet salt as an ASCII string, right-padded to 32 bytes.
    #[serde(default = "default_salt")]
    pub salt: String,

    /// Transport gas limit used when an operation does not set one.
    #[serde(default = "default_transport_gas_limit")]
    pub default_transport_gas_limit: u64,
}

fn default_salt() -> String {
    "ayara".to_string()
}

fn default_transport_gas_limit() -> u64 {
    DEFAULT_TRANSPORT_GAS_LIMIT
}

impl ControllerConfig {
    /// Config for a chain from the protocol chain table.
    pub fn for_chain(chain_id: ChainId, admin: Address) -> anyhow::Result<Self> {
        let info = chains::get_chain_info(chain_id)
            .with_context(|| format!("chain {} is not in the chain table", chain_id))?;
        Ok(Self {
            chain_id,
            chain_name: info.chain_name.to_string(),
            controller_address: default_controller_address(chain_id),
            admin,
            salt: default_salt(),
            default_transport_gas_limit: info.default_transport_gas,
        })
    }

    /// Salt bytes.
    pub fn salt_bytes(&self) -> anyhow::Result<[u8; 32]> {
        salt_from_str(&self.salt)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let chain_id = chains::LOCAL_CHAIN_ID;
        Self {
            chain_id,
            chain_name: chains::LOCAL.to_string(),
            controller_address: default_controller_address(chain_id),
            admin: Address::from_label(DEFAULT_ADMIN_LABEL),
            salt: default_salt(),
            default_transport_gas_limit: DEFAULT_TRANSPORT_GAS_LIMIT,
        }
    }
}

/// Well-known controller address of a chain instance.
pub fn default_controller_address(chain_id: ChainId) -> Address {
    Address::from_label(&format!("ayara-controller:{}", chain_id))
}

/// ASCII salt right-padded to 32 bytes.
pub fn salt_from_str(salt: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = salt.as_bytes();
    if bytes.len() > 32 {
        bail!("salt must be at most 32 bytes, got {}", bytes.len());
    }
    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

// ═══════════════════════════════════════════════════════════════════════════════
// NETWORK CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// A set of chain instances wired together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Chain instances; the first one is the main instance.
    pub instances: Vec<ControllerConfig>,

    /// Tokens allow-listed on every instance at startup.
    pub gas_tokens: Vec<Address>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let admin = Address::from_label(DEFAULT_ADMIN_LABEL);
        let instances = chains::deployed_chains()
            .into_iter()
            .map(|info| ControllerConfig {
                chain_id: info.chain_id,
                chain_name: info.chain_name.to_string(),
                controller_address: default_controller_address(info.chain_id),
                admin,
                salt: default_salt(),
                default_transport_gas_limit: info.default_transport_gas,
            })
            .collect();
        Self {
            instances,
            gas_tokens: vec![Address::from_label(DEFAULT_GAS_TOKEN_LABEL)],
        }
    }
}

impl NetworkConfig {
    /// Load from an optional file (any format the `config` crate reads)
    /// overlaid with `AYARA__*` environment variables.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let network: NetworkConfig = builder
            .build()
            .context("failed to read network config")?
            .try_deserialize()
            .context("invalid network config")?;
        network.validate()?;
        Ok(network)
    }

    /// Check chain ids are unique and every salt fits.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.instances.is_empty() {
            bail!("network config has no instances");
        }
        let mut seen = std::collections::HashSet::new();
        for instance in &self.instances {
            if !seen.insert(instance.chain_id) {
                bail!("chain {} configured twice", instance.chain_id);
            }
            instance
                .salt_bytes()
                .with_context(|| format!("instance {}", instance.chain_id))?;
        }
        let salts: std::collections::HashSet<_> =
            self.instances.iter().map(|i| i.salt.as_str()).collect();
        if salts.len() > 1 {
            bail!("all instances must share one wallet salt");
        }
        Ok(())
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.instances.iter().map(|i| i.chain_id).collect()
    }

    pub fn main_chain_id(&self) -> Option<ChainId> {
        self.instances.first().map(|i| i.chain_id)
    }
}
