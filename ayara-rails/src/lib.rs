//! ayara-rails
//!
//! HTTP service over the controllers of a [`LocalNetwork`].
//!
//! Every mutating route goes through `Controller::dispatch`, with the caller
//! named in the request body. Cross-chain messages are delivered either by
//! background relay tasks or, with `AYARA_AUTO_RELAY=false`, one step at a
//! time through `POST /ayara/relay`.
//!
//! This is a development surface. Requests are not authenticated: the
//! `caller` field is taken at its word, so any client can act as the admin
//! of a controller or fund a wallet from another holder's custody balance.
//! The service binds to loopback unless `AYARA_RAILS_HOST` says otherwise,
//! and should never be reachable from an untrusted network.

use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ayara_controller::{
    Command, CommandOutput, ControllerError, ControllerHandle, Lane, LocalNetwork, NetworkConfig,
};
use ayara_gmp::{chains, Address, Amount, ChainId, FeeData, Operation, PROTOCOL_NAME, PROTOCOL_VERSION};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT VARIABLES
// ═══════════════════════════════════════════════════════════════════════════════

/// Listening port
pub const PORT_ENV: &str = "AYARA_RAILS_PORT";

/// Bind address, loopback by default
pub const HOST_ENV: &str = "AYARA_RAILS_HOST";

/// Optional path of a network config file
pub const NETWORK_CONFIG_ENV: &str = "AYARA_NETWORK_CONFIG";

/// Whether cross-chain messages are relayed in the background
pub const AUTO_RELAY_ENV: &str = "AYARA_AUTO_RELAY";

pub const DEFAULT_PORT: u16 = 3003;

pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RailsConfig {
    pub host: IpAddr,
    pub port: u16,
    pub network_config: Option<String>,
    pub auto_relay: bool,
}

impl Default for RailsConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST,
            port: DEFAULT_PORT,
            network_config: None,
            auto_relay: true,
        }
    }
}

impl RailsConfig {
    /// Read the service settings, loading `.env` first if present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(host) = var(HOST_ENV) {
            config.host = host
                .trim()
                .parse()
                .with_context(|| format!("invalid {}: {:?}", HOST_ENV, host))?;
        }
        if let Some(port) = var(PORT_ENV) {
            config.port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid {}: {:?}", PORT_ENV, port))?;
        }
        if let Some(flag) = var(AUTO_RELAY_ENV) {
            config.auto_relay =
                parse_flag(&flag).with_context(|| format!("invalid {}: {:?}", AUTO_RELAY_ENV, flag))?;
        }
        config.network_config = var(NETWORK_CONFIG_ENV).filter(|path| !path.trim().is_empty());
        Ok(config)
    }

    pub fn load_network(&self) -> anyhow::Result<NetworkConfig> {
        NetworkConfig::load(self.network_config.as_deref())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AppState {
    pub network: Arc<NetworkConfig>,
    pub controllers: Arc<HashMap<ChainId, ControllerHandle>>,
    /// Lanes stepped by `POST /ayara/relay`. Empty when relays run in the
    /// background.
    pub lanes: Arc<Mutex<Vec<Lane>>>,
    pub auto_relay: bool,
}

impl AppState {
    /// With `auto_relay` set this spawns relay tasks, so it must run inside a
    /// tokio runtime.
    pub fn new(mut network: LocalNetwork, auto_relay: bool) -> Self {
        let lanes = if auto_relay {
            let relays = network.spawn_relays();
            info!(relays = relays.len(), "background relays started");
            Vec::new()
        } else {
            network.take_lanes()
        };
        Self {
            network: Arc::new(network.config().clone()),
            controllers: Arc::new(network.controllers().clone()),
            lanes: Arc::new(Mutex::new(lanes)),
            auto_relay,
        }
    }

    fn controller(&self, chain_id: ChainId) -> Result<ControllerHandle, ApiError> {
        self.controllers
            .get(&chain_id)
            .cloned()
            .ok_or_else(|| ControllerError::UnknownChain(chain_id).into())
    }

    async fn dispatch(
        &self,
        chain_id: ChainId,
        caller: Address,
        command: Command,
    ) -> Result<Json<CommandOutput>, ApiError> {
        let handle = self.controller(chain_id)?;
        let mut controller = handle.lock().await;
        let output = controller.dispatch(caller, command)?;
        Ok(Json(output))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Build the router
pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health))
        .route("/ayara/info", get(info))
        // Chains
        .route("/ayara/chains", get(list_chains))
        .route("/ayara/relay", post(relay_pending))
        // Wallets
        .route(
            "/ayara/chains/:chain_id/wallets/:owner/address",
            get(wallet_address),
        )
        .route("/ayara/chains/:chain_id/wallets", post(create_wallet))
        .route("/ayara/chains/:chain_id/fund", post(fund_wallet))
        .route("/ayara/chains/:chain_id/gas-tokens", post(modify_gas_tokens))
        // Operations & settlement
        .route("/ayara/chains/:chain_id/operations", post(execute_operation))
        .route("/ayara/chains/:chain_id/settlements", post(initiate_settlement))
        // Queries
        .route("/ayara/chains/:chain_id/gas/:owner/:token", get(gas_data))
        .route("/ayara/chains/:chain_id/events", get(list_events))
        // Dev
        .route("/ayara/chains/:chain_id/faucet", post(faucet))
        .layer(cors)
        .with_state(state)
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - HEALTH & INFO
// ═══════════════════════════════════════════════════════════════════════════════

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "protocol": PROTOCOL_NAME,
        "chains": state.controllers.len()
    }))
}

async fn info(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "protocol": PROTOCOL_NAME,
        "version": PROTOCOL_VERSION,
        "main_chain_id": state.network.main_chain_id(),
        "chain_ids": state.network.chain_ids(),
        "gas_tokens": state.network.gas_tokens,
        "auto_relay": state.auto_relay,
        "features": {
            "gas_abstraction": true,
            "meta_transactions": true,
            "cross_chain_execution": true,
            "settlement": true
        }
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - CHAINS
// ═══════════════════════════════════════════════════════════════════════════════

async fn list_chains(State(state): State<AppState>) -> impl IntoResponse {
    let mut out = Vec::with_capacity(state.controllers.len());
    for chain_id in state.network.chain_ids() {
        let Some(handle) = state.controllers.get(&chain_id) else {
            continue;
        };
        let controller = handle.lock().await;
        out.push(json!({
            "chain_id": chain_id,
            "name": controller.config().chain_name,
            "display_name": chains::display_name(chain_id),
            "controller": controller.address(),
            "admin": controller.admin(),
            "gas_tokens": controller.ledger().gas_tokens(),
            "wallets": controller.registry().len(),
            "events": controller.events().len()
        }));
    }
    Json(json!({ "chains": out }))
}

/// Deliver every queued cross-chain message, lane by lane.
async fn relay_pending(State(state): State<AppState>) -> impl IntoResponse {
    let mut lanes = state.lanes.lock().await;
    let mut results = Vec::new();
    for lane in lanes.iter_mut() {
        let Some(destination) = state.controllers.get(&lane.destination()) else {
            continue;
        };
        let (source, destination_chain) = (lane.source(), lane.destination());
        for result in lane.deliver_all(destination).await {
            match result {
                Ok(receipt) => results.push(json!({
                    "source_chain_id": source,
                    "destination_chain_id": destination_chain,
                    "receipt": receipt
                })),
                Err(e) => {
                    warn!(source, destination = destination_chain, code = e.code(), "delivery rejected: {}", e);
                    results.push(json!({
                        "source_chain_id": source,
                        "destination_chain_id": destination_chain,
                        "error": e.to_string(),
                        "error_code": e.code()
                    }));
                }
            }
        }
    }
    Json(json!({
        "delivered": results.len(),
        "results": results
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - WALLETS
// ═══════════════════════════════════════════════════════════════════════════════

async fn wallet_address(
    State(state): State<AppState>,
    Path((chain_id, owner)): Path<(ChainId, Address)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let handle = state.controller(chain_id)?;
    let controller = handle.lock().await;
    Ok(Json(json!({
        "chain_id": chain_id,
        "owner": owner,
        "wallet": controller.calculate_wallet_address(&owner),
        "deployed": controller.wallet(&owner).is_some(),
        "nonce": controller.registry().nonce(&owner)
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    pub owner: Address,
    /// Hex-encoded initialization data
    #[serde(with = "ayara_gmp::serde_hex", default)]
    pub init_data: Vec<u8>,
}

async fn create_wallet(
    State(state): State<AppState>,
    Path(chain_id): Path<ChainId>,
    Json(req): Json<CreateWalletRequest>,
) -> Result<Json<CommandOutput>, ApiError> {
    let command = Command::CreateWallet {
        owner: req.owner,
        init_data: req.init_data,
    };
    state.dispatch(chain_id, req.owner, command).await
}

#[derive(Debug, Deserialize)]
pub struct FundRequest {
    /// Account the tokens are pulled from; defaults to the owner
    pub caller: Option<Address>,
    pub owner: Address,
    pub token: Address,
    pub amount: Amount,
}

async fn fund_wallet(
    State(state): State<AppState>,
    Path(chain_id): Path<ChainId>,
    Json(req): Json<FundRequest>,
) -> Result<Json<CommandOutput>, ApiError> {
    let caller = req.caller.unwrap_or(req.owner);
    let command = Command::FundWallet {
        owner: req.owner,
        token: req.token,
        amount: req.amount,
    };
    state.dispatch(chain_id, caller, command).await
}

#[derive(Debug, Deserialize)]
pub struct GasTokensRequest {
    pub caller: Address,
    pub tokens: Vec<Address>,
    #[serde(default = "default_allowed")]
    pub allowed: bool,
}

fn default_allowed() -> bool {
    true
}

async fn modify_gas_tokens(
    State(state): State<AppState>,
    Path(chain_id): Path<ChainId>,
    Json(req): Json<GasTokensRequest>,
) -> Result<Json<CommandOutput>, ApiError> {
    let command = Command::ModifyGasTokens {
        tokens: req.tokens,
        allowed: req.allowed,
    };
    state.dispatch(chain_id, req.caller, command).await
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - OPERATIONS & SETTLEMENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct OperationRequest {
    /// Relayer submitting the operation; defaults to the owner
    pub caller: Option<Address>,
    pub owner: Address,
    /// Defaults to the owner's derived wallet address
    pub wallet: Option<Address>,
    pub fee: FeeData,
    pub operation: Operation,
}

async fn execute_operation(
    State(state): State<AppState>,
    Path(chain_id): Path<ChainId>,
    Json(req): Json<OperationRequest>,
) -> Result<Json<CommandOutput>, ApiError> {
    let handle = state.controller(chain_id)?;
    let mut controller = handle.lock().await;
    let wallet = req
        .wallet
        .unwrap_or_else(|| controller.calculate_wallet_address(&req.owner));
    let command = Command::ExecuteUserOperation {
        owner: req.owner,
        wallet,
        fee: req.fee,
        operation: req.operation,
    };
    let output = controller.dispatch(req.caller.unwrap_or(req.owner), command)?;
    Ok(Json(output))
}

#[derive(Debug, Deserialize)]
pub struct SettlementRequest {
    pub owner: Address,
    pub token: Address,
    pub origin_chain_id: ChainId,
    /// Defaults to the trusted controller of the origin chain
    pub origin_controller: Option<Address>,
    #[serde(default)]
    pub transport_gas_limit: u64,
}

async fn initiate_settlement(
    State(state): State<AppState>,
    Path(chain_id): Path<ChainId>,
    Json(req): Json<SettlementRequest>,
) -> Result<Json<CommandOutput>, ApiError> {
    let handle = state.controller(chain_id)?;
    let mut controller = handle.lock().await;
    let origin_controller = match req.origin_controller {
        Some(address) => address,
        None => controller
            .trusted_peer(req.origin_chain_id)
            .ok_or(ControllerError::UnknownDestination(req.origin_chain_id))?,
    };
    let command = Command::InitiateSettlement {
        owner: req.owner,
        token: req.token,
        origin_chain_id: req.origin_chain_id,
        origin_controller,
        transport_gas_limit: req.transport_gas_limit,
    };
    let output = controller.dispatch(req.owner, command)?;
    Ok(Json(output))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - QUERIES
// ═══════════════════════════════════════════════════════════════════════════════

async fn gas_data(
    State(state): State<AppState>,
    Path((chain_id, owner, token)): Path<(ChainId, Address, Address)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let handle = state.controller(chain_id)?;
    let controller = handle.lock().await;
    let account = controller.get_user_gas_data(&owner, &token);
    Ok(Json(json!({
        "chain_id": chain_id,
        "owner": owner,
        "token": token,
        "total_amount": account.total_amount,
        "used_amount": account.used_amount,
        "locked_amount": account.locked_amount,
        "available": account.available()
    })))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// First sequence number to return
    #[serde(default)]
    pub since: u64,
}

async fn list_events(
    State(state): State<AppState>,
    Path(chain_id): Path<ChainId>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let handle = state.controller(chain_id)?;
    let controller = handle.lock().await;
    let events = controller.events().since(query.since);
    Ok(Json(json!({
        "chain_id": chain_id,
        "total": controller.events().len(),
        "events": events
    })))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - DEV
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct FaucetRequest {
    pub token: Address,
    pub holder: Address,
    pub amount: Amount,
}

async fn faucet(
    State(state): State<AppState>,
    Path(chain_id): Path<ChainId>,
    Json(req): Json<FaucetRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let handle = state.controller(chain_id)?;
    let mut controller = handle.lock().await;
    let balance = controller.faucet(req.token, req.holder, req.amount)?;
    Ok(Json(json!({
        "chain_id": chain_id,
        "token": req.token,
        "holder": req.holder,
        "balance": balance
    })))
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR HANDLING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: String,
}

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        let status = match &err {
            ControllerError::Unauthorized(_) | ControllerError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            ControllerError::UnknownChain(_)
            | ControllerError::UnknownDestination(_)
            | ControllerError::NoPendingAllocation { .. } => StatusCode::NOT_FOUND,
            ControllerError::WalletAlreadyInitialized(_)
            | ControllerError::AuthorizationAlreadyUsed
            | ControllerError::MessageAlreadyProcessed(_)
            | ControllerError::InvalidPhaseTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: err.to_string(),
            code: err.code().into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({
            "error": self.message,
            "error_code": self.code,
        });
        (self.status, Json(body)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

pub mod main_entry {
    use super::*;
    use std::net::SocketAddr;

    pub async fn run_server(config: RailsConfig) -> anyhow::Result<()> {
        let network = config.load_network()?;
        let network = LocalNetwork::new(network).context("failed to build local network")?;
        let state = AppState::new(network, config.auto_relay);

        let addr = SocketAddr::from((config.host, config.port));
        if !addr.ip().is_loopback() {
            warn!(%addr, "rails bound beyond loopback; callers are not authenticated");
        }
        info!(auto_relay = config.auto_relay, "Ayara rails listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        axum::serve(listener, app_router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;
        Ok(())
    }

    async fn shutdown_signal() {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_rails_config_defaults() {
        let config = RailsConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config, RailsConfig::default());
        assert_eq!(config.port, 3003);
        assert!(config.host.is_loopback());
        assert!(config.auto_relay);
    }

    #[test]
    fn test_rails_config_from_vars() {
        let config = RailsConfig::from_vars(vars(&[
            (HOST_ENV, "0.0.0.0"),
            (PORT_ENV, "8080"),
            (AUTO_RELAY_ENV, "off"),
            (NETWORK_CONFIG_ENV, "network.toml"),
        ]))
        .unwrap();
        assert_eq!(config.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.port, 8080);
        assert!(!config.auto_relay);
        assert_eq!(config.network_config.as_deref(), Some("network.toml"));
    }

    #[test]
    fn test_rails_config_rejects_bad_values() {
        assert!(RailsConfig::from_vars(vars(&[(PORT_ENV, "http")])).is_err());
        assert!(RailsConfig::from_vars(vars(&[(HOST_ENV, "localhost:3003")])).is_err());
        assert!(RailsConfig::from_vars(vars(&[(AUTO_RELAY_ENV, "maybe")])).is_err());
        let config = RailsConfig::from_vars(vars(&[(NETWORK_CONFIG_ENV, " ")])).unwrap();
        assert_eq!(config.network_config, None);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ControllerError::InvalidSignature, StatusCode::UNAUTHORIZED),
            (ControllerError::UnknownChain(1), StatusCode::NOT_FOUND),
            (ControllerError::AuthorizationAlreadyUsed, StatusCode::CONFLICT),
            (ControllerError::AmountOverflow, StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            let code = err.code();
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.code, code);
        }
    }
}
