//! Signer and provider collaborators.
//!
//! Wallet front-ends only need three things from the protocol side: the
//! signer's address, a typed-data signature and a way to submit a call to a
//! chain. [`WalletProvider`] is that surface; the controllers never hold keys.

use std::collections::HashMap;

use async_trait::async_trait;
use ayara_gmp::{keccak256, Address, ChainId, Operation};
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;

use crate::auth::{address_of, typed_data_for, AuthorizationEnvelope, TypedDataDomain};
use crate::controller::{Command, CommandOutput, ControllerHandle};
use crate::error::{ControllerError, Result};
use crate::network::LocalNetwork;

/// What a wallet front-end sees of the protocol.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Address of the current signer.
    fn address(&self) -> Address;

    /// 65-byte `r ‖ s ‖ v` signature over the typed-data digest.
    async fn sign_typed_data(
        &self,
        domain: &TypedDataDomain,
        envelope: &AuthorizationEnvelope,
    ) -> Result<Vec<u8>>;

    /// Submit a command to the controller on `chain_id`, as the signer.
    async fn submit(&self, chain_id: ChainId, command: Command) -> Result<CommandOutput>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCAL SIGNER
// ═══════════════════════════════════════════════════════════════════════════════

/// secp256k1 key held in memory.
#[derive(Clone)]
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    pub fn new(key: SigningKey) -> Self {
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    pub fn random() -> Self {
        Self::new(SigningKey::random(&mut OsRng))
    }

    /// Deterministic key: the secret is keccak256 of `seed`.
    pub fn from_seed(seed: impl AsRef<[u8]>) -> Result<Self> {
        let secret = keccak256(seed.as_ref());
        let key = SigningKey::from_slice(&secret)
            .map_err(|e| ControllerError::Signer(format!("invalid seed: {}", e)))?;
        Ok(Self::new(key))
    }

    /// Key from a hex-encoded 32-byte secret.
    pub fn from_hex(secret: &str) -> Result<Self> {
        let bytes = hex::decode(secret.strip_prefix("0x").unwrap_or(secret))
            .map_err(|e| ControllerError::Signer(format!("invalid hex key: {}", e)))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| ControllerError::Signer(format!("invalid key: {}", e)))?;
        Ok(Self::new(key))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a prehashed digest, `v` in the 27/28 convention.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest)
            .map_err(|e| ControllerError::Signer(e.to_string()))?;
        let mut out = signature.to_bytes().to_vec();
        out.push(27 + recovery_id.to_byte());
        Ok(out)
    }

    pub fn sign_typed(
        &self,
        domain: &TypedDataDomain,
        envelope: &AuthorizationEnvelope,
    ) -> Result<Vec<u8>> {
        self.sign_digest(&envelope.signing_digest(domain))
    }

    /// Sign `operation` for execution by `controller` on `chain_id` at
    /// `nonce`, filling in its signature and signed nonce.
    pub fn authorize(
        &self,
        chain_id: ChainId,
        controller: Address,
        wallet: Address,
        nonce: u64,
        operation: &mut Operation,
    ) -> Result<()> {
        let (domain, envelope) = typed_data_for(
            chain_id,
            controller,
            self.address,
            wallet,
            nonce,
            operation.payload_hash(),
        );
        operation.signature = self.sign_typed(&domain, &envelope)?;
        operation.signed_nonce = nonce;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCAL PROVIDER
// ═══════════════════════════════════════════════════════════════════════════════

/// A [`LocalSigner`] connected to the controllers of a [`LocalNetwork`].
pub struct LocalProvider {
    signer: LocalSigner,
    controllers: HashMap<ChainId, ControllerHandle>,
}

impl LocalProvider {
    pub fn new(signer: LocalSigner, network: &LocalNetwork) -> Self {
        Self {
            signer,
            controllers: network.controllers().clone(),
        }
    }

    pub fn signer(&self) -> &LocalSigner {
        &self.signer
    }

    fn controller(&self, chain_id: ChainId) -> Result<&ControllerHandle> {
        self.controllers
            .get(&chain_id)
            .ok_or(ControllerError::UnknownChain(chain_id))
    }

    /// Sign `operation` against the current nonce of the signer's wallet on
    /// its destination chain.
    pub async fn sign_operation(&self, mut operation: Operation) -> Result<Operation> {
        let (domain, envelope) = {
            let controller = self.controller(operation.destination_chain_id)?.lock().await;
            let owner = self.signer.address();
            controller.authorizer().typed_data(
                owner,
                controller.calculate_wallet_address(&owner),
                controller.registry().nonce(&owner),
                operation.payload_hash(),
            )
        };
        operation.signature = self.sign_typed_data(&domain, &envelope).await?;
        operation.signed_nonce = envelope.nonce;
        Ok(operation)
    }
}

#[async_trait]
impl WalletProvider for LocalProvider {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign_typed_data(
        &self,
        domain: &TypedDataDomain,
        envelope: &AuthorizationEnvelope,
    ) -> Result<Vec<u8>> {
        self.signer.sign_typed(domain, envelope)
    }

    async fn submit(&self, chain_id: ChainId, command: Command) -> Result<CommandOutput> {
        let mut controller = self.controller(chain_id)?.lock().await;
        controller.dispatch(self.signer.address(), command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::recover_signer;

    #[test]
    fn test_from_seed_is_deterministic() {
        let a = LocalSigner::from_seed(b"alice").unwrap();
        let b = LocalSigner::from_seed(b"alice").unwrap();
        let c = LocalSigner::from_seed(b"bob").unwrap();
        assert_eq!(a.address(), b.address());
        assert_ne!(a.address(), c.address());
    }

    #[test]
    fn test_signature_recovers_to_address() {
        let signer = LocalSigner::random();
        let digest = keccak256(b"hello");
        let sig = signer.sign_digest(&digest).unwrap();
        assert_eq!(sig.len(), 65);
        assert!(sig[64] == 27 || sig[64] == 28);
        assert_eq!(recover_signer(&digest, &sig).unwrap(), signer.address());
    }

    #[test]
    fn test_from_hex() {
        let signer = LocalSigner::from_hex(&format!("0x{}", "11".repeat(32))).unwrap();
        let again = LocalSigner::from_hex(&"11".repeat(32)).unwrap();
        assert_eq!(signer.address(), again.address());
        assert!(LocalSigner::from_hex("0x00").is_err());
        assert!(LocalSigner::from_hex(&"00".repeat(32)).is_err());
    }

    #[test]
    fn test_authorize_fills_operation() {
        let signer = LocalSigner::from_seed(b"alice").unwrap();
        let mut op = Operation {
            destination_chain_id: 420,
            target: Address([1; 20]),
            value: 0,
            payload: vec![1, 2, 3],
            signature: vec![],
            signed_nonce: 0,
        };
        signer
            .authorize(420, Address([2; 20]), Address([3; 20]), 7, &mut op)
            .unwrap();
        assert_eq!(op.signed_nonce, 7);

        let (domain, envelope) =
            typed_data_for(420, Address([2; 20]), signer.address(), Address([3; 20]), 7, op.payload_hash());
        let signer_address = recover_signer(&envelope.signing_digest(&domain), &op.signature).unwrap();
        assert_eq!(signer_address, signer.address());
    }
}
