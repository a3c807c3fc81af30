//! In-process network of chain instances.

use std::collections::HashMap;
use std::sync::Arc;

use ayara_gmp::ChainId;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::NetworkConfig;
use crate::controller::{Controller, ControllerHandle};
use crate::error::{ControllerError, Result};
use crate::messenger::{self, ChannelMessenger, CrossChainMessenger, Lane};

/// One controller per configured instance, wired pairwise through a
/// [`ChannelMessenger`], with every peer trusted.
pub struct LocalNetwork {
    config: NetworkConfig,
    controllers: HashMap<ChainId, ControllerHandle>,
    /// Lanes not yet taken for manual stepping or relays
    lanes: Vec<Lane>,
}

impl LocalNetwork {
    pub fn new(config: NetworkConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ControllerError::Config(format!("{:#}", e)))?;

        let chain_ids = config.chain_ids();
        let (messenger, lanes) = ChannelMessenger::connect(&chain_ids);
        let messenger: Arc<dyn CrossChainMessenger> = Arc::new(messenger);

        let mut built = Vec::with_capacity(config.instances.len());
        for instance in &config.instances {
            let mut controller = Controller::new(instance.clone(), messenger.clone())?;
            if !config.gas_tokens.is_empty() {
                controller.modify_gas_tokens(instance.admin, config.gas_tokens.clone(), true)?;
            }
            built.push(controller);
        }

        let peers: Vec<_> = config
            .instances
            .iter()
            .map(|i| (i.chain_id, i.controller_address))
            .collect();
        let mut controllers = HashMap::new();
        for mut controller in built {
            for (chain_id, address) in &peers {
                if *chain_id != controller.chain_id() {
                    controller.add_trusted_peer(*chain_id, *address);
                }
            }
            info!(
                chain_id = controller.chain_id(),
                controller = %controller.address(),
                "controller ready"
            );
            controllers.insert(controller.chain_id(), controller.into_handle());
        }

        Ok(Self {
            config,
            controllers,
            lanes,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Chain ids in configuration order, main instance first.
    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.config.chain_ids()
    }

    pub fn controllers(&self) -> &HashMap<ChainId, ControllerHandle> {
        &self.controllers
    }

    pub fn controller(&self, chain_id: ChainId) -> Result<ControllerHandle> {
        self.controllers
            .get(&chain_id)
            .cloned()
            .ok_or(ControllerError::UnknownChain(chain_id))
    }

    /// Take the lane from `source` to `destination` for manual stepping.
    pub fn take_lane(&mut self, source: ChainId, destination: ChainId) -> Option<Lane> {
        let idx = self
            .lanes
            .iter()
            .position(|l| l.source() == source && l.destination() == destination)?;
        Some(self.lanes.remove(idx))
    }

    /// Take every lane not yet taken.
    pub fn take_lanes(&mut self) -> Vec<Lane> {
        std::mem::take(&mut self.lanes)
    }

    /// Start relay tasks on every lane not yet taken.
    pub fn spawn_relays(&mut self) -> Vec<JoinHandle<()>> {
        let lanes = std::mem::take(&mut self.lanes);
        messenger::spawn_relays(lanes, &self.controllers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ayara_gmp::chains::{BASE_GOERLI_CHAIN_ID, OPTIMISM_GOERLI_CHAIN_ID, SEPOLIA_CHAIN_ID};

    #[tokio::test]
    async fn test_default_network_wiring() {
        let mut network = LocalNetwork::new(NetworkConfig::default()).unwrap();
        assert_eq!(network.controllers().len(), 3);

        let sepolia = network.controller(SEPOLIA_CHAIN_ID).unwrap();
        let base = network.controller(BASE_GOERLI_CHAIN_ID).unwrap();
        let base_address = base.lock().await.address();
        {
            let sepolia = sepolia.lock().await;
            assert_eq!(sepolia.trusted_peer(BASE_GOERLI_CHAIN_ID), Some(base_address));
            assert_eq!(sepolia.trusted_peer(SEPOLIA_CHAIN_ID), None);
            assert_eq!(sepolia.ledger().gas_tokens(), network.config().gas_tokens);
        }

        assert!(network.take_lane(SEPOLIA_CHAIN_ID, OPTIMISM_GOERLI_CHAIN_ID).is_some());
        assert!(network.take_lane(SEPOLIA_CHAIN_ID, OPTIMISM_GOERLI_CHAIN_ID).is_none());
        assert_eq!(network.take_lanes().len(), 5);
        assert!(network.take_lanes().is_empty());
        assert!(matches!(
            network.controller(1),
            Err(ControllerError::UnknownChain(1))
        ));
    }

    #[test]
    fn test_empty_network_rejected() {
        let config = NetworkConfig {
            instances: vec![],
            gas_tokens: vec![],
        };
        assert!(matches!(
            LocalNetwork::new(config),
            Err(ControllerError::Config(_))
        ));
    }
}
