//! End-to-end tests across chain instances of a local network.

use std::time::Duration;

use ayara_controller::config::DEFAULT_GAS_TOKEN_LABEL;
use ayara_controller::{
    Command, CommandOutput, ControllerError, ControllerHandle, ExecutionOutcome, LocalNetwork,
    LocalProvider, LocalSigner, NetworkConfig, Receipt, SimulatedExecutor, WalletProvider,
};
use ayara_gmp::chains::{BASE_GOERLI_CHAIN_ID, OPTIMISM_GOERLI_CHAIN_ID, SEPOLIA_CHAIN_ID};
use ayara_gmp::{Address, Amount, ChainId, FeeData, Operation};

// ═══════════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

const ORIGIN: ChainId = SEPOLIA_CHAIN_ID;
const DEST: ChainId = OPTIMISM_GOERLI_CHAIN_ID;
const RELAYER: Address = Address([0x0e; 20]);
const TARGET: Address = Address([0x77; 20]);

fn token() -> Address {
    Address::from_label(DEFAULT_GAS_TOKEN_LABEL)
}

fn network() -> LocalNetwork {
    LocalNetwork::new(NetworkConfig::default()).unwrap()
}

fn operation(destination: ChainId, payload: &[u8]) -> Operation {
    Operation {
        destination_chain_id: destination,
        target: TARGET,
        value: 0,
        payload: payload.to_vec(),
        signature: Vec::new(),
        signed_nonce: 0,
    }
}

async fn fund(handle: &ControllerHandle, owner: Address, amount: Amount) {
    let mut controller = handle.lock().await;
    controller.faucet(token(), owner, amount).unwrap();
    controller.fund_wallet(owner, owner, token(), amount).unwrap();
}

async fn gas(handle: &ControllerHandle, owner: Address) -> (Amount, Amount, Amount) {
    let account = handle.lock().await.get_user_gas_data(&owner, &token());
    (account.total_amount, account.used_amount, account.locked_amount)
}

/// Submit a relayed operation signed by `signer` through `handle`.
async fn relay_operation(
    provider: &LocalProvider,
    handle: &ControllerHandle,
    fee: FeeData,
    operation: Operation,
) -> Result<ExecutionOutcome, ControllerError> {
    let signed = provider.sign_operation(operation).await?;
    let owner = provider.address();
    let mut controller = handle.lock().await;
    let wallet = controller.calculate_wallet_address(&owner);
    controller.execute_user_operation(RELAYER, owner, wallet, fee, signed)
}

async fn wait_until<F>(handle: &ControllerHandle, mut done: F)
where
    F: FnMut(&ayara_controller::Controller) -> bool,
{
    for _ in 0..200 {
        if done(&*handle.lock().await) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

// ═══════════════════════════════════════════════════════════════════════════════
// WALLET ADDRESSING
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_wallet_address_identical_on_every_chain() {
    let network = network();
    let owner = LocalSigner::from_seed(b"alice").unwrap().address();

    let mut addresses = Vec::new();
    for chain_id in network.chain_ids() {
        let handle = network.controller(chain_id).unwrap();
        let mut controller = handle.lock().await;
        let precomputed = controller.calculate_wallet_address(&owner);
        let created = controller.create_wallet(owner, vec![]).unwrap();
        assert_eq!(created, precomputed);
        addresses.push(created);
    }
    assert!(addresses.windows(2).all(|w| w[0] == w[1]));
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_scenario_a_local_fee() {
    let network = network();
    let alice = LocalProvider::new(LocalSigner::from_seed(b"alice").unwrap(), &network);
    let origin = network.controller(ORIGIN).unwrap();
    fund(&origin, alice.address(), 50).await;

    let outcome = relay_operation(
        &alice,
        &origin,
        FeeData::same_token(token(), 1, 1),
        operation(ORIGIN, b"local"),
    )
    .await
    .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Executed { nonce: 0, success: true, .. }));
    assert_eq!(gas(&origin, alice.address()).await, (50, 1, 0));
}

#[tokio::test]
async fn test_scenarios_b_and_c_lock_use_settle() {
    let mut network = network();
    let mut to_dest = network.take_lane(ORIGIN, DEST).unwrap();
    let mut to_origin = network.take_lane(DEST, ORIGIN).unwrap();
    let alice = LocalProvider::new(LocalSigner::from_seed(b"alice").unwrap(), &network);
    let owner = alice.address();
    let origin = network.controller(ORIGIN).unwrap();
    let dest = network.controller(DEST).unwrap();
    fund(&origin, owner, 2000).await;

    // B: lock on the origin
    relay_operation(
        &alice,
        &origin,
        FeeData::same_token(token(), 1000, 100),
        operation(DEST, b"remote"),
    )
    .await
    .unwrap();
    assert_eq!(gas(&origin, owner).await, (2000, 100, 1000));
    assert_eq!(to_dest.pending(), 1);

    // B: use on the destination
    let receipt = to_dest.deliver_next(&dest).await.unwrap().unwrap();
    assert!(matches!(receipt, Receipt::Executed { success: true, .. }));
    assert_eq!(gas(&dest, owner).await, (1000, 100, 0));
    assert!(dest.lock().await.wallet(&owner).is_some());

    // C: settle back
    let origin_controller = origin.lock().await.address();
    let output = dest
        .lock()
        .await
        .dispatch(
            RELAYER,
            Command::InitiateSettlement {
                owner,
                token: token(),
                origin_chain_id: ORIGIN,
                origin_controller,
                transport_gas_limit: 0,
            },
        )
        .unwrap();
    assert!(matches!(output, CommandOutput::SettlementInitiated { ref message_ids } if message_ids.len() == 1));
    assert_eq!(gas(&dest, owner).await, (0, 0, 0));

    let receipt = to_origin.deliver_next(&origin).await.unwrap().unwrap();
    assert!(matches!(receipt, Receipt::Settled { unlocked: 900, .. }));
    assert_eq!(gas(&origin, owner).await, (2000, 100, 100));

    let names = origin.lock().await.events().names();
    assert!(names.ends_with(&["MessageReceived", "WalletGasUnlocked"]));
}

#[tokio::test]
async fn test_settlement_after_local_spend_of_allocation() {
    let mut network = network();
    let mut to_dest = network.take_lane(ORIGIN, DEST).unwrap();
    let mut to_origin = network.take_lane(DEST, ORIGIN).unwrap();
    let alice = LocalProvider::new(LocalSigner::from_seed(b"alice").unwrap(), &network);
    let owner = alice.address();
    let origin = network.controller(ORIGIN).unwrap();
    let dest = network.controller(DEST).unwrap();
    fund(&origin, owner, 2000).await;

    relay_operation(
        &alice,
        &origin,
        FeeData::same_token(token(), 1000, 100),
        operation(DEST, b"remote"),
    )
    .await
    .unwrap();
    to_dest.deliver_next(&dest).await.unwrap().unwrap();

    // Owner spends most of the credited gas directly on the destination
    {
        let mut controller = dest.lock().await;
        let wallet = controller.calculate_wallet_address(&owner);
        controller
            .execute_user_operation(
                owner,
                owner,
                wallet,
                FeeData::same_token(token(), 800, 800),
                operation(DEST, b"local"),
            )
            .unwrap();
    }
    assert_eq!(gas(&dest, owner).await, (1000, 900, 0));

    let origin_controller = origin.lock().await.address();
    let message_ids = dest
        .lock()
        .await
        .initiate_settlement(owner, token(), ORIGIN, origin_controller, 0)
        .unwrap();
    assert_eq!(message_ids.len(), 1);
    assert_eq!(gas(&dest, owner).await, (0, 0, 0));

    let receipt = to_origin.deliver_next(&origin).await.unwrap().unwrap();
    assert!(matches!(receipt, Receipt::Settled { unlocked: 100, .. }));
    assert_eq!(gas(&origin, owner).await, (2000, 100, 900));
}

#[tokio::test]
async fn test_cross_chain_event_order() {
    let mut network = network();
    let _to_dest = network.take_lane(ORIGIN, DEST).unwrap();
    let alice = LocalProvider::new(LocalSigner::from_seed(b"alice").unwrap(), &network);
    let origin = network.controller(ORIGIN).unwrap();
    fund(&origin, alice.address(), 2000).await;
    let before = origin.lock().await.events().len() as u64;

    relay_operation(
        &alice,
        &origin,
        FeeData::same_token(token(), 1000, 100),
        operation(DEST, b"remote"),
    )
    .await
    .unwrap();

    let controller = origin.lock().await;
    let names: Vec<_> = controller
        .events()
        .since(before)
        .iter()
        .map(|e| e.event.name())
        .collect();
    assert_eq!(
        names,
        vec![
            "WalletCreated",
            "WalletGasCharged",
            "OperationExecutionSent",
            "MessageSent",
            "WalletGasLocked"
        ]
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// NONCES AND REPLAY
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_nonce_advances_once_per_execution() {
    let network = network();
    let alice = LocalProvider::new(LocalSigner::from_seed(b"alice").unwrap(), &network);
    let origin = network.controller(ORIGIN).unwrap();
    fund(&origin, alice.address(), 100).await;

    for expected in 0..3u64 {
        let outcome = relay_operation(
            &alice,
            &origin,
            FeeData::same_token(token(), 1, 1),
            operation(ORIGIN, format!("call-{}", expected).as_bytes()),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Executed { nonce, .. } if nonce == expected));
    }
    assert_eq!(origin.lock().await.registry().nonce(&alice.address()), 3);
    assert_eq!(gas(&origin, alice.address()).await, (100, 3, 0));
}

#[tokio::test]
async fn test_reverted_call_burns_nonce_and_fee() {
    let network = network();
    let alice = LocalProvider::new(LocalSigner::from_seed(b"alice").unwrap(), &network);
    let origin = network.controller(ORIGIN).unwrap();
    {
        let mut executor = SimulatedExecutor::new();
        executor.revert_on(TARGET);
        origin.lock().await.set_executor(Box::new(executor));
    }
    fund(&origin, alice.address(), 10).await;

    let signed = alice.sign_operation(operation(ORIGIN, b"revert")).await.unwrap();
    let owner = alice.address();
    let mut controller = origin.lock().await;
    let wallet = controller.calculate_wallet_address(&owner);
    let fee = FeeData::same_token(token(), 2, 2);

    let outcome = controller
        .execute_user_operation(RELAYER, owner, wallet, fee.clone(), signed.clone())
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Executed { success: false, .. }));
    assert_eq!(controller.registry().nonce(&owner), 1);

    // The burnt signature cannot be replayed
    assert!(matches!(
        controller.execute_user_operation(RELAYER, owner, wallet, fee, signed),
        Err(ControllerError::InvalidSignature)
    ));
    assert_eq!(controller.get_user_gas_data(&owner, &token()).used_amount, 2);
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_dropped_message_leaves_gas_locked() {
    let mut network = network();
    let mut to_dest = network.take_lane(ORIGIN, DEST).unwrap();
    let alice = LocalProvider::new(LocalSigner::from_seed(b"alice").unwrap(), &network);
    let origin = network.controller(ORIGIN).unwrap();
    let dest = network.controller(DEST).unwrap();
    fund(&origin, alice.address(), 1000).await;

    relay_operation(
        &alice,
        &origin,
        FeeData::same_token(token(), 500, 50),
        operation(DEST, b"lost"),
    )
    .await
    .unwrap();
    assert!(to_dest.drop_next().is_some());
    assert!(to_dest.deliver_next(&dest).await.is_none());

    // Nothing settles a lost allocation
    assert_eq!(gas(&origin, alice.address()).await, (1000, 50, 500));
    assert!(dest.lock().await.wallet(&alice.address()).is_none());
}

#[tokio::test]
async fn test_lanes_are_independent() {
    let mut network = network();
    let mut to_op = network.take_lane(ORIGIN, DEST).unwrap();
    let mut to_base = network.take_lane(ORIGIN, BASE_GOERLI_CHAIN_ID).unwrap();
    let alice = LocalProvider::new(LocalSigner::from_seed(b"alice").unwrap(), &network);
    let origin = network.controller(ORIGIN).unwrap();
    let op = network.controller(DEST).unwrap();
    let base = network.controller(BASE_GOERLI_CHAIN_ID).unwrap();
    fund(&origin, alice.address(), 1000).await;

    let fee = FeeData::same_token(token(), 100, 10);
    relay_operation(&alice, &origin, fee.clone(), operation(DEST, b"first"))
        .await
        .unwrap();
    relay_operation(&alice, &origin, fee, operation(BASE_GOERLI_CHAIN_ID, b"second"))
        .await
        .unwrap();

    // Deliver the later message first
    to_base.deliver_next(&base).await.unwrap().unwrap();
    to_op.deliver_next(&op).await.unwrap().unwrap();

    assert_eq!(gas(&op, alice.address()).await, (100, 10, 0));
    assert_eq!(gas(&base, alice.address()).await, (100, 10, 0));
    assert_eq!(gas(&origin, alice.address()).await, (1000, 20, 200));
}

#[tokio::test]
async fn test_redelivered_message_rejected() {
    let mut network = network();
    let mut to_dest = network.take_lane(ORIGIN, DEST).unwrap();
    let alice = LocalProvider::new(LocalSigner::from_seed(b"alice").unwrap(), &network);
    let origin = network.controller(ORIGIN).unwrap();
    let dest = network.controller(DEST).unwrap();
    fund(&origin, alice.address(), 1000).await;
    relay_operation(
        &alice,
        &origin,
        FeeData::same_token(token(), 100, 10),
        operation(DEST, b"once"),
    )
    .await
    .unwrap();

    let message = to_dest.try_next().unwrap();
    dest.lock().await.receive(message.clone()).unwrap();
    assert!(matches!(
        dest.lock().await.receive(message),
        Err(ControllerError::MessageAlreadyProcessed(_))
    ));
    assert_eq!(gas(&dest, alice.address()).await, (100, 10, 0));
}

#[tokio::test]
async fn test_relay_tasks_deliver_in_background() {
    let mut network = network();
    let _relays = network.spawn_relays();
    let alice = LocalProvider::new(LocalSigner::from_seed(b"alice").unwrap(), &network);
    let owner = alice.address();
    let origin = network.controller(ORIGIN).unwrap();
    let dest = network.controller(DEST).unwrap();
    fund(&origin, owner, 2000).await;

    relay_operation(
        &alice,
        &origin,
        FeeData::same_token(token(), 1000, 100),
        operation(DEST, b"relayed"),
    )
    .await
    .unwrap();
    wait_until(&dest, |c| c.registry().nonce(&owner) == 1).await;
    assert_eq!(gas(&dest, owner).await, (1000, 100, 0));

    let origin_controller = origin.lock().await.address();
    dest.lock()
        .await
        .initiate_settlement(owner, token(), ORIGIN, origin_controller, 0)
        .unwrap();
    wait_until(&origin, |c| c.get_user_gas_data(&owner, &token()).locked_amount == 100).await;
    assert_eq!(gas(&origin, owner).await, (2000, 100, 100));
}

#[tokio::test]
async fn test_provider_submits_as_signer() {
    let network = network();
    let alice = LocalProvider::new(LocalSigner::from_seed(b"alice").unwrap(), &network);
    let owner = alice.address();

    let output = alice
        .submit(DEST, Command::CreateWallet { owner, init_data: vec![] })
        .await
        .unwrap();
    assert!(matches!(output, CommandOutput::WalletCreated { .. }));

    // Self-submitted operations need no signature
    let wallet = network
        .controller(DEST)
        .unwrap()
        .lock()
        .await
        .calculate_wallet_address(&owner);
    let output = alice
        .submit(
            DEST,
            Command::ExecuteUserOperation {
                owner,
                wallet,
                fee: FeeData::same_token(token(), 0, 0),
                operation: operation(DEST, b"self"),
            },
        )
        .await
        .unwrap();
    assert!(matches!(
        output,
        CommandOutput::OperationSubmitted {
            outcome: ExecutionOutcome::Executed { nonce: 0, .. }
        }
    ));

    assert!(matches!(
        alice.submit(1, Command::CreateWallet { owner, init_data: vec![] }).await,
        Err(ControllerError::UnknownChain(1))
    ));
}

#[tokio::test]
async fn test_provider_typed_data_signature_relayed() {
    let network = network();
    let alice = LocalProvider::new(LocalSigner::from_seed(b"alice").unwrap(), &network);
    let owner = alice.address();
    let origin = network.controller(ORIGIN).unwrap();
    fund(&origin, owner, 10).await;

    let mut op = operation(ORIGIN, b"typed");
    let (domain, envelope, wallet) = {
        let controller = origin.lock().await;
        let wallet = controller.calculate_wallet_address(&owner);
        let (domain, envelope) = controller.authorizer().typed_data(
            owner,
            wallet,
            controller.registry().nonce(&owner),
            op.payload_hash(),
        );
        (domain, envelope, wallet)
    };
    assert_eq!(envelope.nonce, 0);
    op.signature = alice.sign_typed_data(&domain, &envelope).await.unwrap();

    let outcome = origin
        .lock()
        .await
        .execute_user_operation(RELAYER, owner, wallet, FeeData::same_token(token(), 2, 2), op)
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Executed { nonce: 0, success: true, .. }));
    assert_eq!(origin.lock().await.registry().nonce(&owner), 1);
    assert_eq!(gas(&origin, owner).await, (10, 2, 0));
}
