//! ayara-controller
//!
//! Per-chain protocol core of the Ayara gas-abstraction wallet. Each chain
//! instance runs one [`Controller`] that derives wallet addresses, keeps the
//! three-bucket gas ledger, verifies owner authorizations and drives the
//! lock → use → settle → unlock lifecycle of cross-chain fee allocations.
//! Instances share no state; they talk only through a [`CrossChainMessenger`].

pub mod auth;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod executor;
pub mod ledger;
pub mod messenger;
pub mod network;
pub mod registry;
pub mod settlement;
pub mod signer;
pub mod vault;

pub use auth::{Authorization, AuthorizationEnvelope, MetaTxAuthorizer, TypedDataDomain};
pub use config::{ControllerConfig, NetworkConfig};
pub use controller::{
    Command, CommandOutput, Controller, ControllerHandle, ExecutionOutcome, Receipt,
};
pub use error::{ControllerError, Result};
pub use events::{Event, EventLog, RecordedEvent};
pub use executor::{CallExecutor, CallOutcome, SimulatedExecutor, WalletCall};
pub use ledger::{GasAccount, GasLedger};
pub use messenger::{spawn_relays, ChannelMessenger, CrossChainMessenger, Lane, OutboundMessage};
pub use network::LocalNetwork;
pub use registry::{WalletInstance, WalletRegistry, DEFAULT_SALT};
pub use settlement::{AllocationPhase, SettlementCoordinator};
pub use signer::{LocalProvider, LocalSigner, WalletProvider};
pub use vault::{TokenCustody, TokenVault};
