//! ayara-gmp
//!
//! Wire-level types shared by every Ayara chain instance. This crate provides
//! the account and message identifiers, the typed controller calls that travel
//! between instances, and the ABI encoding used to put them on the transport.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use thiserror::Error;

pub mod chains;
pub mod encoding;

/// Protocol name used in the typed-data domain.
pub const PROTOCOL_NAME: &str = "Ayara";

/// Protocol version used in the typed-data domain.
pub const PROTOCOL_VERSION: &str = "1";

/// Chain identifier (EVM chain id).
pub type ChainId = u64;

/// Token amount in base units.
pub type Amount = u128;

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum GmpError {
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ═══════════════════════════════════════════════════════════════════════════════
// HASHING
// ═══════════════════════════════════════════════════════════════════════════════

/// Keccak-256 of `data`.
pub fn keccak256(data: impl AsRef<[u8]>) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data.as_ref());
    hasher.finalize().into()
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADDRESS
// ═══════════════════════════════════════════════════════════════════════════════

/// 20-byte account identifier (owners, wallets, tokens, controllers).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Build an address from exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, GmpError> {
        let arr: [u8; 20] = bytes.try_into().map_err(|_| {
            GmpError::InvalidAddress(format!("expected 20 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Parse a hex address, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, GmpError> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|e| GmpError::InvalidAddress(format!("{}: {}", s, e)))?;
        Self::from_slice(&bytes)
    }

    /// Deterministic address for a human-readable label, used for
    /// well-known protocol accounts.
    pub fn from_label(label: &str) -> Self {
        let hash = keccak256(label.as_bytes());
        let mut out = [0u8; 20];
        out.copy_from_slice(&hash[12..]);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Left-padded 32-byte word, as the ABI lays out an `address`.
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = GmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MESSAGE ID
// ═══════════════════════════════════════════════════════════════════════════════

/// Transport-assigned identifier of a cross-chain message.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageId(pub [u8; 32]);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = serde_hex::decode_str(&s).map_err(de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| de::Error::custom("message id must be 32 bytes"))?;
        Ok(MessageId(arr))
    }
}

/// Serde helpers for `0x`-prefixed byte strings.
pub mod serde_hex {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_str(&s).map_err(de::Error::custom)
    }

    /// Decode `0x…` / bare hex. `"0x"` and `""` decode to empty bytes.
    pub fn decode_str(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(s.strip_prefix("0x").unwrap_or(s))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Fee terms attached to a user operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeData {
    /// Gas token debited on the chain the operation is submitted to
    pub source_token: Address,
    /// Gas token the allocation is credited in on the destination
    pub destination_token: Address,
    /// Upper bound of gas the operation may consume (the cross-chain allocation)
    pub max_fee: Amount,
    /// Fee paid to the relayer that submitted the operation
    pub relayer_fee: Amount,
    /// Gas limit requested from the transport for remote delivery
    #[serde(default)]
    pub transport_gas_limit: u64,
}

impl FeeData {
    /// Fee terms where source and destination use the same token.
    pub fn same_token(token: Address, max_fee: Amount, relayer_fee: Amount) -> Self {
        Self {
            source_token: token,
            destination_token: token,
            max_fee,
            relayer_fee,
            transport_gas_limit: 0,
        }
    }

    /// Gasless operations skip charging and the allow-list check.
    pub fn is_free(&self) -> bool {
        self.max_fee == 0 && self.relayer_fee == 0
    }
}

/// A user operation as submitted to a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Chain the operation executes on
    pub destination_chain_id: ChainId,
    /// Call target
    pub target: Address,
    /// Native value forwarded with the call
    #[serde(default)]
    pub value: Amount,
    /// Call data
    #[serde(with = "serde_hex", default)]
    pub payload: Vec<u8>,
    /// 65-byte owner signature, or empty when the owner submits directly
    #[serde(with = "serde_hex", default)]
    pub signature: Vec<u8>,
    /// Nonce the owner signed for the destination wallet. Only read when the
    /// operation leaves the submitting chain; local execution always uses the
    /// local wallet's current nonce.
    #[serde(default)]
    pub signed_nonce: u64,
}

impl Operation {
    /// Hash of the call data, as embedded in the signed envelope.
    pub fn payload_hash(&self) -> [u8; 32] {
        keccak256(&self.payload)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROLLER CALLS
// ═══════════════════════════════════════════════════════════════════════════════

/// Tag byte of an encoded controller call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Execute an operation with a fresh fee allocation
    ExecuteOperation = 0,
    /// Report remote usage of an allocation back to its origin
    Settle = 1,
}

impl TryFrom<u8> for MessageType {
    type Error = GmpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ExecuteOperation),
            1 => Ok(Self::Settle),
            _ => Err(GmpError::InvalidMessageType(value)),
        }
    }
}

/// Operation forwarded from its origin chain together with its fee allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteExecution {
    pub owner: Address,
    /// Wallet address (identical on every chain)
    pub wallet: Address,
    pub fee: FeeData,
    pub operation: Operation,
    /// Account that submitted the operation on the origin chain
    pub relayer: Address,
    /// The owner submitted the operation themselves on the origin chain
    pub authorized_by_owner: bool,
}

/// Usage report closing an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub owner: Address,
    /// Token locked on the origin
    pub source_token: Address,
    /// Token the allocation was credited in on the remote
    pub destination_token: Address,
    pub allocated: Amount,
    pub used_on_remote: Amount,
}

impl SettlementReport {
    /// Unused share of the allocation.
    pub fn remainder(&self) -> Option<Amount> {
        self.allocated.checked_sub(self.used_on_remote)
    }
}

/// Typed payload of a cross-chain message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerCall {
    ExecuteOperation(RemoteExecution),
    Settle(SettlementReport),
}

impl ControllerCall {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ExecuteOperation(_) => MessageType::ExecuteOperation,
            Self::Settle(_) => MessageType::Settle,
        }
    }

    /// Encode for wire transmission: tag byte followed by ABI words.
    pub fn encode(&self) -> Vec<u8> {
        let body = match self {
            Self::ExecuteOperation(exec) => encoding::encode_remote_execution(exec),
            Self::Settle(report) => encoding::encode_settlement(report),
        };
        let mut out = Vec::with_capacity(1 + body.len());
        out.push(self.message_type() as u8);
        out.extend_from_slice(&body);
        out
    }

    /// Decode from wire format
    pub fn decode(bytes: &[u8]) -> Result<Self, GmpError> {
        let (tag, body) = bytes
            .split_first()
            .ok_or_else(|| GmpError::Decoding("empty controller call".into()))?;

        match MessageType::try_from(*tag)? {
            MessageType::ExecuteOperation => {
                Ok(Self::ExecuteOperation(encoding::decode_remote_execution(body)?))
            }
            MessageType::Settle => Ok(Self::Settle(encoding::decode_settlement(body)?)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CROSS-CHAIN MESSAGE
// ═══════════════════════════════════════════════════════════════════════════════

/// Envelope handed to the transport. The transport never looks at
/// `encoded_call`; the receiving controller decodes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainMessage {
    pub message_id: MessageId,
    pub source_chain_id: ChainId,
    pub destination_chain_id: ChainId,
    pub source_controller: Address,
    pub transport_gas_limit: u64,
    #[serde(with = "serde_hex")]
    pub encoded_call: Vec<u8>,
}

impl CrossChainMessage {
    /// Message id for the `sequence`-th message on a lane.
    pub fn compute_id(
        source_chain_id: ChainId,
        destination_chain_id: ChainId,
        sequence: u64,
        encoded_call: &[u8],
    ) -> MessageId {
        let mut hasher = Keccak256::new();
        hasher.update(source_chain_id.to_be_bytes());
        hasher.update(destination_chain_id.to_be_bytes());
        hasher.update(sequence.to_be_bytes());
        hasher.update(keccak256(encoded_call));
        MessageId(hasher.finalize().into())
    }

    pub fn decode_call(&self) -> Result<ControllerCall, GmpError> {
        ControllerCall::decode(&self.encoded_call)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
