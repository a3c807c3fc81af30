//! Deterministic wallet addressing and per-chain wallet instances.

use std::collections::HashMap;

use ayara_gmp::{keccak256, Address, ChainId};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::{ControllerError, Result};

/// Default wallet salt: ASCII "ayara" right-padded to 32 bytes.
pub const DEFAULT_SALT: [u8; 32] = {
    let mut salt = [0u8; 32];
    salt[0] = b'a';
    salt[1] = b'y';
    salt[2] = b'a';
    salt[3] = b'r';
    salt[4] = b'a';
    salt
};

/// One chain's copy of an owner's wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInstance {
    /// Wallet address (same on every chain)
    pub address: Address,
    /// Owner controlling the wallet
    pub owner: Address,
    /// Chain this instance lives on
    pub chain_id: ChainId,
    /// Controller that created the instance
    pub controller: Address,
    /// Next nonce the owner must sign
    pub nonce: u64,
    pub initialized: bool,
    /// Opaque data passed at creation
    #[serde(with = "ayara_gmp::serde_hex")]
    pub init_data: Vec<u8>,
}

/// Outcome of creating a wallet on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    Existing,
}

/// Wallet registry of one chain instance.
#[derive(Debug, Clone)]
pub struct WalletRegistry {
    chain_id: ChainId,
    controller: Address,
    salt: [u8; 32],
    wallets: HashMap<Address, WalletInstance>,
}

impl WalletRegistry {
    pub fn new(chain_id: ChainId, controller: Address, salt: [u8; 32]) -> Self {
        Self {
            chain_id,
            controller,
            salt,
            wallets: HashMap::new(),
        }
    }

    pub fn salt(&self) -> &[u8; 32] {
        &self.salt
    }

    /// Wallet address for `owner`. Only the owner and the salt enter the
    /// pre-image, so every chain computes the same address.
    pub fn calculate_address(&self, owner: &Address) -> Address {
        derive_wallet_address(owner, &self.salt)
    }

    /// Explicit creation. A second call for the same owner fails.
    pub fn create_wallet(&mut self, owner: Address, init_data: Vec<u8>) -> Result<Address> {
        if self.wallets.contains_key(&owner) {
            return Err(ControllerError::WalletAlreadyInitialized(owner));
        }
        Ok(self.insert(owner, init_data).address)
    }

    /// Return the owner's wallet, creating it if this chain has none yet.
    pub fn get_or_create(&mut self, owner: Address) -> (&mut WalletInstance, Provisioned) {
        let provisioned = if self.wallets.contains_key(&owner) {
            Provisioned::Existing
        } else {
            Provisioned::Created
        };
        let fresh = self.new_instance(owner, Vec::new());
        (self.wallets.entry(owner).or_insert(fresh), provisioned)
    }

    /// Copy of the owner's wallet, or of the instance `get_or_create` would
    /// create. Nothing is stored until [`WalletRegistry::commit`].
    pub fn snapshot(&self, owner: &Address) -> (WalletInstance, Provisioned) {
        match self.wallets.get(owner) {
            Some(wallet) => (wallet.clone(), Provisioned::Existing),
            None => (self.new_instance(*owner, Vec::new()), Provisioned::Created),
        }
    }

    /// Store a wallet taken with [`WalletRegistry::snapshot`].
    pub fn commit(&mut self, wallet: WalletInstance) {
        self.wallets.insert(wallet.owner, wallet);
    }

    pub fn wallet(&self, owner: &Address) -> Option<&WalletInstance> {
        self.wallets.get(owner)
    }

    /// Current nonce, 0 for an owner without a wallet on this chain.
    pub fn nonce(&self, owner: &Address) -> u64 {
        self.wallets.get(owner).map(|w| w.nonce).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    fn insert(&mut self, owner: Address, init_data: Vec<u8>) -> &mut WalletInstance {
        let wallet = self.new_instance(owner, init_data);
        self.wallets.entry(owner).or_insert(wallet)
    }

    fn new_instance(&self, owner: Address, init_data: Vec<u8>) -> WalletInstance {
        WalletInstance {
            address: self.calculate_address(&owner),
            owner,
            chain_id: self.chain_id,
            controller: self.controller,
            nonce: 0,
            initialized: true,
            init_data,
        }
    }
}

/// `keccak256(0xff ‖ salt ‖ keccak256(pad32(owner)))[12..]`
pub fn derive_wallet_address(owner: &Address, salt: &[u8; 32]) -> Address {
    let owner_hash = keccak256(owner.to_word());

    let mut hasher = Keccak256::new();
    hasher.update([0xffu8]);
    hasher.update(salt);
    hasher.update(owner_hash);
    let hash: [u8; 32] = hasher.finalize().into();

    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Address(out)
}
