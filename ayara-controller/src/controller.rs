//! Per-chain controller.
//!
//! The controller is the only entry point of a chain instance. It composes the
//! wallet registry, gas ledger, authorizer, settlement coordinator and
//! messenger, and every call runs under the instance's single lock (see
//! [`ControllerHandle`]). Each entry point checks everything that can fail
//! before it mutates anything, so a failed call leaves no trace.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ayara_gmp::chains;
use ayara_gmp::{
    Address, Amount, ChainId, ControllerCall, CrossChainMessage, FeeData, MessageId, Operation,
    RemoteExecution, SettlementReport,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::auth::{self, MetaTxAuthorizer};
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::events::{Event, EventLog};
use crate::executor::{CallExecutor, SimulatedExecutor, WalletCall};
use crate::ledger::{GasAccount, GasLedger};
use crate::messenger::{CrossChainMessenger, OutboundMessage};
use crate::registry::{Provisioned, WalletInstance, WalletRegistry};
use crate::settlement::SettlementCoordinator;
use crate::vault::{TokenCustody, TokenVault};

/// A controller behind its instance lock.
pub type ControllerHandle = Arc<Mutex<Controller>>;

// ═══════════════════════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Entry points of a controller as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    CreateWallet {
        owner: Address,
        #[serde(with = "ayara_gmp::serde_hex", default)]
        init_data: Vec<u8>,
    },
    FundWallet {
        owner: Address,
        token: Address,
        amount: Amount,
    },
    ModifyGasTokens {
        tokens: Vec<Address>,
        allowed: bool,
    },
    ExecuteUserOperation {
        owner: Address,
        wallet: Address,
        fee: FeeData,
        operation: Operation,
    },
    InitiateSettlement {
        owner: Address,
        token: Address,
        origin_chain_id: ChainId,
        origin_controller: Address,
        #[serde(default)]
        transport_gas_limit: u64,
    },
}

/// Result of a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "output", rename_all = "snake_case")]
pub enum CommandOutput {
    WalletCreated { wallet: Address },
    WalletFunded { account: GasAccount },
    GasTokensModified { tokens: Vec<Address> },
    OperationSubmitted { outcome: ExecutionOutcome },
    SettlementInitiated { message_ids: Vec<MessageId> },
}

/// What happened to a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Ran on this chain. `nonce` is the nonce the operation consumed.
    Executed {
        wallet: Address,
        nonce: u64,
        success: bool,
        #[serde(with = "ayara_gmp::serde_hex")]
        return_data: Vec<u8>,
    },
    /// Handed to the messenger for another chain.
    Sent {
        message_id: MessageId,
        destination_chain_id: ChainId,
    },
}

/// What a delivered message did on the receiving chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Receipt {
    Executed {
        owner: Address,
        nonce: u64,
        success: bool,
    },
    /// The operation was not authorized here. Its allocation stays open.
    Rejected { owner: Address, reason: String },
    Settled {
        owner: Address,
        token: Address,
        unlocked: Amount,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROLLER
// ═══════════════════════════════════════════════════════════════════════════════

/// Controller of one chain instance.
pub struct Controller {
    config: ControllerConfig,
    registry: WalletRegistry,
    ledger: GasLedger,
    authorizer: MetaTxAuthorizer,
    settlement: SettlementCoordinator,
    custody: Box<dyn TokenCustody>,
    executor: Box<dyn CallExecutor>,
    messenger: Arc<dyn CrossChainMessenger>,
    /// Controller address accepted from each peer chain
    trusted_peers: HashMap<ChainId, Address>,
    processed_messages: HashSet<MessageId>,
    /// Digests of signed cross-chain authorizations already sent from here
    consumed_authorizations: HashSet<[u8; 32]>,
    events: EventLog,
}

impl Controller {
    pub fn new(config: ControllerConfig, messenger: Arc<dyn CrossChainMessenger>) -> Result<Self> {
        let salt = config.salt_bytes()?;
        let chain_id = config.chain_id;
        let address = config.controller_address;
        Ok(Self {
            registry: WalletRegistry::new(chain_id, address, salt),
            ledger: GasLedger::new(),
            authorizer: MetaTxAuthorizer::new(chain_id, address),
            settlement: SettlementCoordinator::new(),
            custody: Box::new(TokenVault::new()),
            executor: Box::new(SimulatedExecutor::new()),
            messenger,
            trusted_peers: HashMap::new(),
            processed_messages: HashSet::new(),
            consumed_authorizations: HashSet::new(),
            events: EventLog::new(chain_id),
            config,
        })
    }

    pub fn with_executor(mut self, executor: Box<dyn CallExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn set_executor(&mut self, executor: Box<dyn CallExecutor>) {
        self.executor = executor;
    }

    pub fn into_handle(self) -> ControllerHandle {
        Arc::new(Mutex::new(self))
    }

    // ─── accessors ─────────────────────────────────────────────────────────────

    pub fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    pub fn address(&self) -> Address {
        self.config.controller_address
    }

    pub fn admin(&self) -> Address {
        self.config.admin
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &WalletRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &GasLedger {
        &self.ledger
    }

    pub fn authorizer(&self) -> &MetaTxAuthorizer {
        &self.authorizer
    }

    pub fn settlement(&self) -> &SettlementCoordinator {
        &self.settlement
    }

    pub fn custody(&self) -> &dyn TokenCustody {
        self.custody.as_ref()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn wallet(&self, owner: &Address) -> Option<&WalletInstance> {
        self.registry.wallet(owner)
    }

    pub fn add_trusted_peer(&mut self, chain_id: ChainId, controller: Address) {
        self.trusted_peers.insert(chain_id, controller);
    }

    pub fn trusted_peer(&self, chain_id: ChainId) -> Option<Address> {
        self.trusted_peers.get(&chain_id).copied()
    }

    pub fn is_message_processed(&self, message_id: &MessageId) -> bool {
        self.processed_messages.contains(message_id)
    }

    // ─── entry points ──────────────────────────────────────────────────────────

    pub fn dispatch(&mut self, caller: Address, command: Command) -> Result<CommandOutput> {
        match command {
            Command::CreateWallet { owner, init_data } => {
                let wallet = self.create_wallet(owner, init_data)?;
                Ok(CommandOutput::WalletCreated { wallet })
            }
            Command::FundWallet {
                owner,
                token,
                amount,
            } => {
                let account = self.fund_wallet(caller, owner, token, amount)?;
                Ok(CommandOutput::WalletFunded { account })
            }
            Command::ModifyGasTokens { tokens, allowed } => {
                let tokens = self.modify_gas_tokens(caller, tokens, allowed)?;
                Ok(CommandOutput::GasTokensModified { tokens })
            }
            Command::ExecuteUserOperation {
                owner,
                wallet,
                fee,
                operation,
            } => {
                let outcome = self.execute_user_operation(caller, owner, wallet, fee, operation)?;
                Ok(CommandOutput::OperationSubmitted { outcome })
            }
            Command::InitiateSettlement {
                owner,
                token,
                origin_chain_id,
                origin_controller,
                transport_gas_limit,
            } => {
                let message_ids = self.initiate_settlement(
                    owner,
                    token,
                    origin_chain_id,
                    origin_controller,
                    transport_gas_limit,
                )?;
                Ok(CommandOutput::SettlementInitiated { message_ids })
            }
        }
    }

    /// Explicitly create the owner's wallet on this chain.
    pub fn create_wallet(&mut self, owner: Address, init_data: Vec<u8>) -> Result<Address> {
        let wallet = self.registry.create_wallet(owner, init_data)?;
        self.events.emit(Event::WalletCreated { owner, wallet });
        Ok(wallet)
    }

    pub fn calculate_wallet_address(&self, owner: &Address) -> Address {
        self.registry.calculate_address(owner)
    }

    /// Pull `amount` of `token` from `caller` into custody and credit it to
    /// `owner`.
    pub fn fund_wallet(
        &mut self,
        caller: Address,
        owner: Address,
        token: Address,
        amount: Amount,
    ) -> Result<GasAccount> {
        self.ledger.ensure_gas_token(&token)?;
        let next = self.ledger.account(&owner, &token).funded(amount)?;
        self.custody
            .transfer(&token, &caller, &self.config.controller_address, amount)?;
        self.ledger.commit(owner, token, next);
        self.events.emit(Event::WalletGasFunded {
            owner,
            token,
            amount,
        });
        Ok(next)
    }

    /// Admin-only allow-list update. Returns the allow-list afterwards.
    pub fn modify_gas_tokens(
        &mut self,
        caller: Address,
        tokens: Vec<Address>,
        allowed: bool,
    ) -> Result<Vec<Address>> {
        if caller != self.config.admin {
            return Err(ControllerError::Unauthorized(caller));
        }
        self.ledger.set_gas_tokens(&tokens, allowed);
        self.events
            .emit(Event::GasTokensModified { tokens, allowed });
        Ok(self.ledger.gas_tokens())
    }

    pub fn get_user_gas_data(&self, owner: &Address, token: &Address) -> GasAccount {
        self.ledger.account(owner, token)
    }

    /// Credit test tokens to `holder` in custody.
    pub fn faucet(&mut self, token: Address, holder: Address, amount: Amount) -> Result<Amount> {
        let balance = self.custody.deposit(token, holder, amount)?;
        info!(chain_id = self.chain_id(), %token, %holder, amount, "faucet deposit");
        Ok(balance)
    }

    /// Execute an owner's operation here, or send it to its destination chain
    /// and lock its fee allocation.
    pub fn execute_user_operation(
        &mut self,
        caller: Address,
        owner: Address,
        wallet: Address,
        fee: FeeData,
        operation: Operation,
    ) -> Result<ExecutionOutcome> {
        let expected = self.registry.calculate_address(&owner);
        if wallet != expected {
            return Err(ControllerError::WalletMismatch {
                expected,
                provided: wallet,
            });
        }
        if fee.relayer_fee > fee.max_fee {
            return Err(ControllerError::RelayerFeeExceedsMaxFee {
                max_fee: fee.max_fee,
                relayer_fee: fee.relayer_fee,
            });
        }

        if operation.destination_chain_id == self.chain_id() {
            self.execute_local(caller, owner, fee, operation)
        } else {
            self.send_remote(caller, owner, fee, operation)
        }
    }

    fn execute_local(
        &mut self,
        caller: Address,
        owner: Address,
        fee: FeeData,
        operation: Operation,
    ) -> Result<ExecutionOutcome> {
        let (mut instance, provisioned) = self.registry.snapshot(&owner);
        self.authorizer.verify(
            &instance,
            &caller,
            operation.payload_hash(),
            &operation.signature,
        )?;
        let debit = if fee.is_free() {
            None
        } else {
            self.ledger.ensure_gas_token(&fee.source_token)?;
            Some(self.ledger.prepare_debit(
                owner,
                fee.source_token,
                fee.relayer_fee,
                caller,
                fee.relayer_fee,
                0,
            )?)
        };

        // Nothing below can fail: commit.
        let nonce = instance.nonce;
        auth::advance_nonce(&mut instance);
        let wallet = instance.address;
        self.registry.commit(instance);
        if provisioned == Provisioned::Created {
            self.events.emit(Event::WalletCreated { owner, wallet });
        }
        if let Some(debit) = debit {
            self.ledger.apply_debit(debit);
            self.events.emit(Event::WalletGasCharged {
                owner,
                token: fee.source_token,
                max_fee: fee.max_fee,
                relayer_fee: fee.relayer_fee,
            });
        }

        let outcome = self.executor.execute(&WalletCall {
            chain_id: self.chain_id(),
            wallet,
            target: operation.target,
            value: operation.value,
            payload: operation.payload,
        });
        if !outcome.success {
            warn!(chain_id = self.chain_id(), %owner, nonce, target = %operation.target, "wallet call reverted");
        }
        self.events.emit(Event::OperationExecuted {
            owner,
            wallet,
            target: operation.target,
            nonce,
            success: outcome.success,
        });

        Ok(ExecutionOutcome::Executed {
            wallet,
            nonce,
            success: outcome.success,
            return_data: outcome.return_data,
        })
    }

    fn send_remote(
        &mut self,
        caller: Address,
        owner: Address,
        fee: FeeData,
        operation: Operation,
    ) -> Result<ExecutionOutcome> {
        let chain_id = self.chain_id();
        let destination = operation.destination_chain_id;
        let remote_controller = self
            .trusted_peer(destination)
            .ok_or(ControllerError::UnknownDestination(destination))?;
        if !self.messenger.has_route(chain_id, destination) {
            return Err(ControllerError::UnknownDestination(destination));
        }

        let (instance, provisioned) = self.registry.snapshot(&owner);
        let wallet = instance.address;

        // The owner signed for the destination wallet; check that here so a
        // bad authorization never locks gas on this chain.
        let (authorized_by_owner, digest) = if caller == owner {
            (true, None)
        } else {
            let (domain, envelope) = auth::typed_data_for(
                destination,
                remote_controller,
                owner,
                wallet,
                operation.signed_nonce,
                operation.payload_hash(),
            );
            let digest = auth::verify_envelope(&domain, &envelope, &operation.signature)?;
            if self.consumed_authorizations.contains(&digest) {
                return Err(ControllerError::AuthorizationAlreadyUsed);
            }
            (false, Some(digest))
        };

        let debit = if fee.is_free() {
            None
        } else {
            self.ledger.ensure_gas_token(&fee.source_token)?;
            Some(self.ledger.prepare_debit(
                owner,
                fee.source_token,
                fee.relayer_fee,
                caller,
                fee.relayer_fee,
                fee.max_fee,
            )?)
        };

        let transport_gas_limit = if fee.transport_gas_limit > 0 {
            fee.transport_gas_limit
        } else {
            self.default_gas_limit(destination)
        };
        let target = operation.target;
        let message = self.messenger.send(OutboundMessage {
            source_chain_id: chain_id,
            destination_chain_id: destination,
            source_controller: self.address(),
            transport_gas_limit,
            call: ControllerCall::ExecuteOperation(RemoteExecution {
                owner,
                wallet,
                fee: fee.clone(),
                operation,
                relayer: caller,
                authorized_by_owner,
            }),
        })?;

        // Sent: commit.
        if provisioned == Provisioned::Created {
            self.registry.commit(instance);
            self.events.emit(Event::WalletCreated { owner, wallet });
        }
        if let Some(digest) = digest {
            self.consumed_authorizations.insert(digest);
        }
        if let Some(debit) = debit {
            self.ledger.apply_debit(debit);
            self.events.emit(Event::WalletGasCharged {
                owner,
                token: fee.source_token,
                max_fee: fee.max_fee,
                relayer_fee: fee.relayer_fee,
            });
        }
        self.events.emit(Event::OperationExecutionSent {
            owner,
            wallet,
            destination_chain_id: destination,
            target,
        });
        self.events.emit(Event::MessageSent {
            message_id: message.message_id,
            destination_chain_id: destination,
        });
        if !fee.is_free() && fee.max_fee > 0 {
            self.settlement
                .record_lock(owner, fee.source_token, destination, fee.max_fee)?;
            self.events.emit(Event::WalletGasLocked {
                owner,
                token: fee.source_token,
                amount: fee.max_fee,
            });
        }

        Ok(ExecutionOutcome::Sent {
            message_id: message.message_id,
            destination_chain_id: destination,
        })
    }

    /// Report the usage of every open allocation `origin_chain_id` sent for
    /// (owner, token) back to it, and remove the allocations from this chain.
    pub fn initiate_settlement(
        &mut self,
        owner: Address,
        token: Address,
        origin_chain_id: ChainId,
        origin_controller: Address,
        transport_gas_limit: u64,
    ) -> Result<Vec<MessageId>> {
        let chain_id = self.chain_id();
        if !self.messenger.has_route(chain_id, origin_chain_id) {
            return Err(ControllerError::UnknownDestination(origin_chain_id));
        }
        let planned = self.settlement.plan(
            &self.ledger,
            owner,
            token,
            origin_chain_id,
            origin_controller,
        )?;
        let transport_gas_limit = if transport_gas_limit > 0 {
            transport_gas_limit
        } else {
            self.default_gas_limit(origin_chain_id)
        };

        let mut message_ids = Vec::with_capacity(planned.len());
        for settlement in planned {
            let sent = self.messenger.send(OutboundMessage {
                source_chain_id: chain_id,
                destination_chain_id: origin_chain_id,
                source_controller: self.address(),
                transport_gas_limit,
                call: ControllerCall::Settle(settlement.report.clone()),
            });
            let message = match sent {
                Ok(message) => message,
                Err(e) if message_ids.is_empty() => return Err(e),
                Err(e) => {
                    warn!(chain_id, %owner, "settlement stopped after {} reports: {}", message_ids.len(), e);
                    break;
                }
            };

            self.settlement.complete(&mut self.ledger, &settlement)?;
            self.events.emit(Event::WalletGasSettled {
                owner,
                token,
                origin_chain_id,
                allocated: settlement.report.allocated,
                used: settlement.report.used_on_remote,
            });
            self.events.emit(Event::MessageSent {
                message_id: message.message_id,
                destination_chain_id: origin_chain_id,
            });
            message_ids.push(message.message_id);
        }
        Ok(message_ids)
    }

    // ─── message receipt ───────────────────────────────────────────────────────

    /// Handle a message delivered by the transport.
    pub fn receive(&mut self, message: CrossChainMessage) -> Result<Receipt> {
        let chain_id = self.chain_id();
        if message.destination_chain_id != chain_id {
            return Err(ControllerError::WrongDestination {
                expected: message.destination_chain_id,
                actual: chain_id,
            });
        }
        let source = message.source_chain_id;
        if self.trusted_peer(source) != Some(message.source_controller) {
            return Err(ControllerError::UntrustedSource {
                chain_id: source,
                controller: message.source_controller,
            });
        }
        if self.processed_messages.contains(&message.message_id) {
            return Err(ControllerError::MessageAlreadyProcessed(message.message_id));
        }
        let call = message.decode_call()?;

        // A message that fails before `mark_received` changed nothing and
        // may be delivered again.
        match call {
            ControllerCall::ExecuteOperation(execution) => self.receive_execution(
                message.message_id,
                source,
                message.source_controller,
                execution,
            ),
            ControllerCall::Settle(report) => {
                self.receive_settlement(message.message_id, source, report)
            }
        }
    }

    fn mark_received(&mut self, message_id: MessageId, source: ChainId) {
        self.processed_messages.insert(message_id);
        self.events.emit(Event::MessageReceived {
            message_id,
            source_chain_id: source,
        });
    }

    fn receive_execution(
        &mut self,
        message_id: MessageId,
        source: ChainId,
        source_controller: Address,
        execution: RemoteExecution,
    ) -> Result<Receipt> {
        let owner = execution.owner;
        let fee = &execution.fee;

        let (mut instance, provisioned) = self.registry.snapshot(&owner);
        if fee.max_fee > 0 {
            self.settlement.open_allocation(
                &mut self.ledger,
                owner,
                fee.destination_token,
                source,
                source_controller,
                fee.source_token,
                fee.max_fee,
            )?;
        }

        // Allocation open: the message is consumed from here on.
        self.mark_received(message_id, source);
        if provisioned == Provisioned::Created {
            self.registry.commit(instance.clone());
            self.events.emit(Event::WalletCreated {
                owner,
                wallet: instance.address,
            });
        }
        if fee.max_fee > 0 {
            self.events.emit(Event::WalletGasFunded {
                owner,
                token: fee.destination_token,
                amount: fee.max_fee,
            });
        }

        let accepted = self
            .check_remote_execution(&instance, &execution)
            .and_then(|()| {
                if fee.relayer_fee == 0 {
                    return Ok(());
                }
                self.settlement.charge_allocation(
                    &mut self.ledger,
                    owner,
                    fee.destination_token,
                    source,
                    fee.source_token,
                    fee.relayer_fee,
                    execution.relayer,
                    fee.relayer_fee,
                )
            });
        if let Err(e) = accepted {
            let reason = e.to_string();
            warn!(chain_id = self.chain_id(), %owner, source, code = e.code(), "remote operation rejected: {}", reason);
            self.events.emit(Event::OperationRejected {
                owner,
                source_chain_id: source,
                reason: reason.clone(),
            });
            return Ok(Receipt::Rejected { owner, reason });
        }
        if fee.relayer_fee > 0 {
            self.events.emit(Event::WalletGasCharged {
                owner,
                token: fee.destination_token,
                max_fee: fee.max_fee,
                relayer_fee: fee.relayer_fee,
            });
        }

        let nonce = instance.nonce;
        auth::advance_nonce(&mut instance);
        let wallet = instance.address;
        self.registry.commit(instance);

        let operation = execution.operation;
        let outcome = self.executor.execute(&WalletCall {
            chain_id: self.chain_id(),
            wallet,
            target: operation.target,
            value: operation.value,
            payload: operation.payload,
        });
        if !outcome.success {
            warn!(chain_id = self.chain_id(), %owner, nonce, target = %operation.target, "wallet call reverted");
        }
        self.events.emit(Event::OperationExecuted {
            owner,
            wallet,
            target: operation.target,
            nonce,
            success: outcome.success,
        });
        Ok(Receipt::Executed {
            owner,
            nonce,
            success: outcome.success,
        })
    }

    fn check_remote_execution(&self, instance: &WalletInstance, execution: &RemoteExecution) -> Result<()> {
        if execution.wallet != instance.address {
            return Err(ControllerError::WalletMismatch {
                expected: instance.address,
                provided: execution.wallet,
            });
        }
        if execution.operation.destination_chain_id != self.chain_id() {
            return Err(ControllerError::WrongDestination {
                expected: execution.operation.destination_chain_id,
                actual: self.chain_id(),
            });
        }
        if execution.authorized_by_owner {
            return Ok(());
        }
        self.authorizer.verify(
            instance,
            &execution.relayer,
            execution.operation.payload_hash(),
            &execution.operation.signature,
        )?;
        Ok(())
    }

    fn receive_settlement(
        &mut self,
        message_id: MessageId,
        source: ChainId,
        report: SettlementReport,
    ) -> Result<Receipt> {
        let unlocked = self
            .settlement
            .apply_settlement(&mut self.ledger, source, &report)?;
        self.mark_received(message_id, source);
        self.events.emit(Event::WalletGasUnlocked {
            owner: report.owner,
            token: report.source_token,
            amount: unlocked,
        });
        Ok(Receipt::Settled {
            owner: report.owner,
            token: report.source_token,
            unlocked,
        })
    }

    fn default_gas_limit(&self, chain_id: ChainId) -> u64 {
        chains::get_chain_info(chain_id)
            .map(|info| info.default_transport_gas)
            .unwrap_or(self.config.default_transport_gas_limit)
    }
}
