//! Meta-transaction authorization.
//!
//! Owners authorize an operation by signing an EIP-712 `Transaction` struct
//! bound to one wallet on one chain. The signed nonce must equal the wallet's
//! current nonce exactly, so a signature is usable once and only in order.

use ayara_gmp::encoding::AbiWriter;
use ayara_gmp::{keccak256, Address, ChainId, PROTOCOL_NAME, PROTOCOL_VERSION};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};
use crate::registry::WalletInstance;

/// `EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)`
pub const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

/// Signed struct type.
pub const TRANSACTION_TYPE: &str = "Transaction(address ownerAddress,address controllerAddress,uint256 chainId,uint256 nonce,bytes32 data)";

// ═══════════════════════════════════════════════════════════════════════════════
// TYPED DATA
// ═══════════════════════════════════════════════════════════════════════════════

/// Signing domain; `verifying_contract` is the wallet address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedDataDomain {
    pub name: String,
    pub version: String,
    pub chain_id: ChainId,
    pub verifying_contract: Address,
}

impl TypedDataDomain {
    pub fn new(chain_id: ChainId, wallet: Address) -> Self {
        Self {
            name: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            chain_id,
            verifying_contract: wallet,
        }
    }

    pub fn separator(&self) -> [u8; 32] {
        let mut w = AbiWriter::with_words(5);
        w.bytes32(&keccak256(DOMAIN_TYPE))
            .bytes32(&keccak256(self.name.as_bytes()))
            .bytes32(&keccak256(self.version.as_bytes()))
            .uint64(self.chain_id)
            .address(&self.verifying_contract);
        keccak256(w.finish())
    }
}

/// The message an owner signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationEnvelope {
    pub owner_address: Address,
    pub controller_address: Address,
    pub chain_id: ChainId,
    pub nonce: u64,
    /// keccak256 of the operation payload
    pub payload_hash: [u8; 32],
}

impl AuthorizationEnvelope {
    pub fn struct_hash(&self) -> [u8; 32] {
        let mut w = AbiWriter::with_words(6);
        w.bytes32(&keccak256(TRANSACTION_TYPE))
            .address(&self.owner_address)
            .address(&self.controller_address)
            .uint64(self.chain_id)
            .uint64(self.nonce)
            .bytes32(&self.payload_hash);
        keccak256(w.finish())
    }

    /// `keccak256(0x19 0x01 ‖ domainSeparator ‖ structHash)`
    pub fn signing_digest(&self, domain: &TypedDataDomain) -> [u8; 32] {
        let mut preimage = Vec::with_capacity(66);
        preimage.extend_from_slice(&[0x19, 0x01]);
        preimage.extend_from_slice(&domain.separator());
        preimage.extend_from_slice(&self.struct_hash());
        keccak256(preimage)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIGNATURE RECOVERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Address of a secp256k1 public key: last 20 bytes of keccak256 over the
/// uncompressed point without its prefix byte.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Address(out)
}

/// Recover the signer of a 65-byte `r ‖ s ‖ v` signature over `digest`.
pub fn recover_signer(digest: &[u8; 32], signature: &[u8]) -> Result<Address> {
    if signature.len() != 65 {
        return Err(ControllerError::InvalidSignature);
    }
    let v = match signature[64] {
        0 | 27 => 0,
        1 | 28 => 1,
        _ => return Err(ControllerError::InvalidSignature),
    };
    let sig = Signature::from_slice(&signature[..64]).map_err(|_| ControllerError::InvalidSignature)?;
    let recovery_id = RecoveryId::from_byte(v).ok_or(ControllerError::InvalidSignature)?;
    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|_| ControllerError::InvalidSignature)?;
    Ok(address_of(&key))
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUTHORIZER
// ═══════════════════════════════════════════════════════════════════════════════

/// How an operation was authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// The owner submitted it; no signature was checked.
    SelfSubmitted,
    /// The owner's signature over this digest was verified.
    Signed { digest: [u8; 32] },
}

/// Verifies owner authorizations for one controller.
#[derive(Debug, Clone)]
pub struct MetaTxAuthorizer {
    chain_id: ChainId,
    controller: Address,
}

impl MetaTxAuthorizer {
    pub fn new(chain_id: ChainId, controller: Address) -> Self {
        Self {
            chain_id,
            controller,
        }
    }

    /// Domain and envelope the owner signs for `nonce` on this controller.
    pub fn typed_data(
        &self,
        owner: Address,
        wallet: Address,
        nonce: u64,
        payload_hash: [u8; 32],
    ) -> (TypedDataDomain, AuthorizationEnvelope) {
        typed_data_for(self.chain_id, self.controller, owner, wallet, nonce, payload_hash)
    }

    /// Check an operation against the wallet's current nonce. Nothing is
    /// mutated; the caller consumes the nonce with [`advance_nonce`] in the
    /// same state transition that executes the operation.
    pub fn verify(
        &self,
        wallet: &WalletInstance,
        caller: &Address,
        payload_hash: [u8; 32],
        signature: &[u8],
    ) -> Result<Authorization> {
        if *caller == wallet.owner {
            return Ok(Authorization::SelfSubmitted);
        }
        let (domain, envelope) =
            self.typed_data(wallet.owner, wallet.address, wallet.nonce, payload_hash);
        let digest = verify_envelope(&domain, &envelope, signature)?;
        Ok(Authorization::Signed { digest })
    }
}

/// Typed data for an arbitrary controller, used to check signatures meant
/// for another chain.
pub fn typed_data_for(
    chain_id: ChainId,
    controller: Address,
    owner: Address,
    wallet: Address,
    nonce: u64,
    payload_hash: [u8; 32],
) -> (TypedDataDomain, AuthorizationEnvelope) {
    let domain = TypedDataDomain::new(chain_id, wallet);
    let envelope = AuthorizationEnvelope {
        owner_address: owner,
        controller_address: controller,
        chain_id,
        nonce,
        payload_hash,
    };
    (domain, envelope)
}

/// Verify that `signature` is the envelope owner's signature, returning
/// the signed digest.
pub fn verify_envelope(
    domain: &TypedDataDomain,
    envelope: &AuthorizationEnvelope,
    signature: &[u8],
) -> Result<[u8; 32]> {
    let digest = envelope.signing_digest(domain);
    let signer = recover_signer(&digest, signature)?;
    if signer != envelope.owner_address {
        return Err(ControllerError::InvalidSignature);
    }
    Ok(digest)
}

/// Consume the wallet's current nonce.
pub fn advance_nonce(wallet: &mut WalletInstance) -> u64 {
    wallet.nonce += 1;
    wallet.nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{WalletRegistry, DEFAULT_SALT};
    use k256::ecdsa::SigningKey;

    const CHAIN: ChainId = 11155111;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_slice(&[seed; 32]).unwrap()
    }

    fn sign(key: &SigningKey, digest: &[u8; 32], v_offset: u8) -> Vec<u8> {
        let (sig, recid) = key.sign_prehash_recoverable(digest).unwrap();
        let mut out = sig.to_bytes().to_vec();
        out.push(recid.to_byte() + v_offset);
        out
    }

    fn setup() -> (MetaTxAuthorizer, WalletInstance, SigningKey) {
        let owner_key = key(7);
        let owner = address_of(owner_key.verifying_key());
        let controller = Address::from_label("controller");
        let mut registry = WalletRegistry::new(CHAIN, controller, DEFAULT_SALT);
        let (wallet, _) = registry.get_or_create(owner);
        (MetaTxAuthorizer::new(CHAIN, controller), wallet.clone(), owner_key)
    }

    fn owner_signature(
        auth: &MetaTxAuthorizer,
        wallet: &WalletInstance,
        key: &SigningKey,
        nonce: u64,
        payload: &[u8],
    ) -> Vec<u8> {
        let (domain, envelope) = auth.typed_data(wallet.owner, wallet.address, nonce, keccak256(payload));
        sign(key, &envelope.signing_digest(&domain), 27)
    }

    #[test]
    fn test_domain_separator_depends_on_chain_and_wallet() {
        let a = TypedDataDomain::new(1, Address([1; 20])).separator();
        let b = TypedDataDomain::new(2, Address([1; 20])).separator();
        let c = TypedDataDomain::new(1, Address([2; 20])).separator();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_recover_accepts_both_v_conventions() {
        let k = key(3);
        let digest = keccak256(b"digest");
        let expected = address_of(k.verifying_key());

        assert_eq!(recover_signer(&digest, &sign(&k, &digest, 27)).unwrap(), expected);
        assert_eq!(recover_signer(&digest, &sign(&k, &digest, 0)).unwrap(), expected);
    }

    #[test]
    fn test_recover_rejects_malformed() {
        let digest = keccak256(b"digest");
        assert!(recover_signer(&digest, &[]).is_err());
        assert!(recover_signer(&digest, &[0u8; 64]).is_err());

        let mut sig = sign(&key(3), &digest, 27);
        sig[64] = 29;
        assert!(recover_signer(&digest, &sig).is_err());
    }

    #[test]
    fn test_valid_signature_at_current_nonce() {
        let (auth, wallet, owner_key) = setup();
        let relayer = Address([0xee; 20]);
        let payload = b"approve";
        let sig = owner_signature(&auth, &wallet, &owner_key, 0, payload);

        let result = auth.verify(&wallet, &relayer, keccak256(payload), &sig).unwrap();
        assert!(matches!(result, Authorization::Signed { .. }));
    }

    #[test]
    fn test_future_and_past_nonce_rejected() {
        let (auth, mut wallet, owner_key) = setup();
        let relayer = Address([0xee; 20]);
        let payload = b"approve";

        let future = owner_signature(&auth, &wallet, &owner_key, 1, payload);
        assert!(matches!(
            auth.verify(&wallet, &relayer, keccak256(payload), &future),
            Err(ControllerError::InvalidSignature)
        ));

        let current = owner_signature(&auth, &wallet, &owner_key, 0, payload);
        advance_nonce(&mut wallet);
        assert!(matches!(
            auth.verify(&wallet, &relayer, keccak256(payload), &current),
            Err(ControllerError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let (auth, wallet, _) = setup();
        let relayer = Address([0xee; 20]);
        let payload = b"approve";
        let sig = owner_signature(&auth, &wallet, &key(9), 0, payload);

        assert!(auth.verify(&wallet, &relayer, keccak256(payload), &sig).is_err());
    }

    #[test]
    fn test_payload_is_bound() {
        let (auth, wallet, owner_key) = setup();
        let relayer = Address([0xee; 20]);
        let sig = owner_signature(&auth, &wallet, &owner_key, 0, b"approve");

        assert!(auth.verify(&wallet, &relayer, keccak256(b"transfer"), &sig).is_err());
    }

    #[test]
    fn test_self_submitted_needs_no_signature() {
        let (auth, wallet, _) = setup();
        let result = auth.verify(&wallet, &wallet.owner.clone(), keccak256(b"x"), &[]).unwrap();
        assert_eq!(result, Authorization::SelfSubmitted);

        // Empty signature from anyone else is rejected
        let relayer = Address([0xee; 20]);
        assert!(auth.verify(&wallet, &relayer, keccak256(b"x"), &[]).is_err());
    }

    #[test]
    fn test_signature_for_other_controller_rejected() {
        let (auth, wallet, owner_key) = setup();
        let other = MetaTxAuthorizer::new(CHAIN, Address::from_label("other-controller"));
        let relayer = Address([0xee; 20]);
        let sig = owner_signature(&other, &wallet, &owner_key, 0, b"approve");

        assert!(auth.verify(&wallet, &relayer, keccak256(b"approve"), &sig).is_err());
    }

    #[test]
    fn test_advance_nonce() {
        let (_, mut wallet, _) = setup();
        assert_eq!(advance_nonce(&mut wallet), 1);
        assert_eq!(advance_nonce(&mut wallet), 2);
    }
}
