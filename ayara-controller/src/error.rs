//! Error types for the Ayara controller.

use ayara_gmp::{Address, Amount, ChainId, GmpError, MessageId};
use thiserror::Error;

use crate::settlement::AllocationPhase;

/// Errors that can occur in controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    // ═══════════════════════════════════════════════════════════════════════════
    // PROTOCOL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════
    #[error("token {0} is not an approved gas token")]
    NotApprovedGasToken(Address),

    #[error("wallet for owner {0} is already initialized")]
    WalletAlreadyInitialized(Address),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("authorization already used")]
    AuthorizationAlreadyUsed,

    #[error("insufficient gas balance: available {available}, requested {requested}")]
    InsufficientGasBalance { available: Amount, requested: Amount },

    #[error("unauthorized: {0}")]
    Unauthorized(Address),

    // ═══════════════════════════════════════════════════════════════════════════
    // LEDGER ERRORS
    // ═══════════════════════════════════════════════════════════════════════════
    #[error("unlock of {requested} exceeds locked amount {locked}")]
    UnlockExceedsLocked { locked: Amount, requested: Amount },

    #[error("relayer fee {relayer_fee} exceeds max fee {max_fee}")]
    RelayerFeeExceedsMaxFee { max_fee: Amount, relayer_fee: Amount },

    #[error("token balance of {holder} too low: has {balance}, needs {requested}")]
    InsufficientTokenBalance {
        holder: Address,
        balance: Amount,
        requested: Amount,
    },

    #[error("amount overflow")]
    AmountOverflow,

    // ═══════════════════════════════════════════════════════════════════════════
    // WALLET ERRORS
    // ═══════════════════════════════════════════════════════════════════════════
    #[error("wallet mismatch: owner's wallet is {expected}, got {provided}")]
    WalletMismatch { expected: Address, provided: Address },

    // ═══════════════════════════════════════════════════════════════════════════
    // MESSAGING ERRORS
    // ═══════════════════════════════════════════════════════════════════════════
    #[error("no route to destination chain {0}")]
    UnknownDestination(ChainId),

    #[error("untrusted source: chain={chain_id}, controller={controller}")]
    UntrustedSource { chain_id: ChainId, controller: Address },

    #[error("message {0} already processed")]
    MessageAlreadyProcessed(MessageId),

    #[error("message for chain {expected} delivered to chain {actual}")]
    WrongDestination { expected: ChainId, actual: ChainId },

    #[error("lane {source_chain_id} -> {destination_chain_id} is closed")]
    LaneClosed {
        source_chain_id: ChainId,
        destination_chain_id: ChainId,
    },

    // ═══════════════════════════════════════════════════════════════════════════
    // SETTLEMENT ERRORS
    // ═══════════════════════════════════════════════════════════════════════════
    #[error("no pending allocation for owner {owner}, token {token} from chain {origin_chain_id}")]
    NoPendingAllocation {
        owner: Address,
        token: Address,
        origin_chain_id: ChainId,
    },

    #[error("settlement reports {used} used of an allocation of {allocated}")]
    SettlementExceedsAllocation { allocated: Amount, used: Amount },

    #[error("invalid allocation transition: {from:?} -> {to:?}")]
    InvalidPhaseTransition {
        from: AllocationPhase,
        to: AllocationPhase,
    },

    // ═══════════════════════════════════════════════════════════════════════════
    // INFRASTRUCTURE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════
    #[error("configuration error: {0}")]
    Config(String),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("unknown chain instance: {0}")]
    UnknownChain(ChainId),

    #[error(transparent)]
    Gmp(#[from] GmpError),
}

impl ControllerError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotApprovedGasToken(_) => "NOT_APPROVED_GAS_TOKEN",
            Self::WalletAlreadyInitialized(_) => "WALLET_ALREADY_INITIALIZED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::AuthorizationAlreadyUsed => "AUTHORIZATION_ALREADY_USED",
            Self::InsufficientGasBalance { .. } => "INSUFFICIENT_GAS_BALANCE",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::UnlockExceedsLocked { .. } => "UNLOCK_EXCEEDS_LOCKED",
            Self::RelayerFeeExceedsMaxFee { .. } => "RELAYER_FEE_EXCEEDS_MAX_FEE",
            Self::InsufficientTokenBalance { .. } => "INSUFFICIENT_TOKEN_BALANCE",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::WalletMismatch { .. } => "WALLET_MISMATCH",
            Self::UnknownDestination(_) => "UNKNOWN_DESTINATION",
            Self::UntrustedSource { .. } => "UNTRUSTED_SOURCE",
            Self::MessageAlreadyProcessed(_) => "MESSAGE_ALREADY_PROCESSED",
            Self::WrongDestination { .. } => "WRONG_DESTINATION",
            Self::LaneClosed { .. } => "LANE_CLOSED",
            Self::NoPendingAllocation { .. } => "NO_PENDING_ALLOCATION",
            Self::SettlementExceedsAllocation { .. } => "SETTLEMENT_EXCEEDS_ALLOCATION",
            Self::InvalidPhaseTransition { .. } => "INVALID_PHASE_TRANSITION",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Signer(_) => "SIGNER_ERROR",
            Self::UnknownChain(_) => "UNKNOWN_CHAIN",
            Self::Gmp(_) => "GMP_ERROR",
        }
    }
}

impl From<anyhow::Error> for ControllerError {
    fn from(err: anyhow::Error) -> Self {
        ControllerError::Config(err.to_string())
    }
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;
