//! Contract scenarios: delegation and ingestion, calls with state effects,
//! the fuel budget, and the permanent-invalidity gate.

use tally_crypto::ed25519::SigningKey;
use tally_integration_tests::{address_of, TestEnv, SPIN_AND_PAY_ABI, SPIN_AND_PAY_WAT};
use tally_state::query;
use tally_types::RcdHash;

/// A funded chain plus a delegated contract address.
async fn delegated_env() -> (TestEnv, SigningKey, RcdHash, tally_state::Chain) {
    let env = TestEnv::new();
    let alice = SigningKey::generate();
    let contract_chain = env.publish_contract(SPIN_AND_PAY_WAT, SPIN_AND_PAY_ABI);
    let mut chain = env.create_chain("FAT-0", -1, vec![]);

    env.apply(&mut chain, vec![env.fat0_coinbase(&[(address_of(&alice), 1_000)])])
        .expect("mint");

    // Delegate a fresh address to the contract; ingestion fetches once.
    let bound: RcdHash = [0x77; 32];
    env.apply(
        &mut chain,
        vec![env.fat0_delegate(&alice, &bound, 100, &contract_chain)],
    )
    .expect("delegate");
    assert_eq!(env.client.fetch_count(), 1);

    let handle = chain.handle();
    assert_eq!(query::get_balance(&handle, &bound).await.expect("balance"), 100);
    (env, alice, bound, chain)
}

#[tokio::test]
async fn test_call_exhausting_fuel_is_rejected_atomically() {
    let (env, alice, bound, mut chain) = delegated_env().await;

    let oog = env.fat0_call(&alice, &bound, 10, "burn", &[]);
    let oog_hash = oog.hash();
    env.apply(&mut chain, vec![oog]).expect("block applies");

    let handle = chain.handle();
    // The carrying transfer rolled back with the call.
    assert_eq!(query::get_balance(&handle, &bound).await.expect("balance"), 100);
    assert_eq!(query::get_balance(&handle, &address_of(&alice)).await.expect("balance"), 900);
    assert!(query::get_transaction(&handle, &oog_hash)
        .await
        .expect("query")
        .is_none());
}

#[tokio::test]
async fn test_call_mutates_state_through_host() {
    let (env, alice, bound, mut chain) = delegated_env().await;

    // remember(0x42) stores the recipient byte in contract kv storage.
    env.apply(&mut chain, vec![env.fat0_call(&alice, &bound, 5, "remember", &[0x42])])
        .expect("remember");
    // pay(3) sends 3 units from the bound address to [0x42; 32].
    env.apply(&mut chain, vec![env.fat0_call(&alice, &bound, 2, "pay", &[3])])
        .expect("pay");

    let handle = chain.handle();
    // bound received 5 + 2 with the calls and paid 3 out.
    assert_eq!(query::get_balance(&handle, &bound).await.expect("balance"), 104);
    assert_eq!(
        query::get_balance(&handle, &[0x42; 32]).await.expect("balance"),
        3
    );
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_call() {
    let (env, alice, bound, mut chain) = delegated_env().await;
    // A budget the spinning guest will not exhaust; only the cancellation
    // signal can stop it.
    chain.state.exec_limit = u64::MAX;

    let cancel = tally_state::Cancel::new();
    {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            cancel.cancel();
        });
    }

    let head_key_mr = chain.state.head.as_ref().expect("head").key_mr;
    let eb = env.eblock(
        chain.state.sync_height + 1,
        head_key_mr,
        vec![env.fat0_call(&alice, &bound, 10, "burn", &[])],
    );
    let err = chain.apply_eblock(&[0xdb; 32], &eb, &cancel);
    assert!(matches!(err, Err(tally_state::Error::Cancelled)));

    // The aborted block left no trace; the sync watermark did not move.
    assert_eq!(chain.state.sync_height, 12);
    let handle = chain.handle();
    assert_eq!(query::get_balance(&handle, &bound).await.expect("balance"), 100);
    assert_eq!(query::get_balance(&handle, &address_of(&alice)).await.expect("balance"), 900);
}

#[tokio::test]
async fn test_call_on_unbound_address_rejected() {
    let env = TestEnv::new();
    let alice = SigningKey::generate();
    let mut chain = env.create_chain("FAT-0", -1, vec![]);
    env.apply(&mut chain, vec![env.fat0_coinbase(&[(address_of(&alice), 100)])])
        .expect("mint");

    let call = env.fat0_call(&alice, &[0x55; 32], 10, "burn", &[]);
    let call_hash = call.hash();
    env.apply(&mut chain, vec![call]).expect("block applies");

    let handle = chain.handle();
    assert_eq!(query::get_balance(&handle, &[0x55; 32]).await.expect("balance"), 0);
    assert!(query::get_transaction(&handle, &call_hash)
        .await
        .expect("query")
        .is_none());
}

#[tokio::test]
async fn test_undefined_function_rejected() {
    let (env, alice, bound, mut chain) = delegated_env().await;

    let call = env.fat0_call(&alice, &bound, 10, "no_such_func", &[]);
    let call_hash = call.hash();
    env.apply(&mut chain, vec![call]).expect("block applies");

    let handle = chain.handle();
    assert_eq!(query::get_balance(&handle, &bound).await.expect("balance"), 100);
    assert!(query::get_transaction(&handle, &call_hash)
        .await
        .expect("query")
        .is_none());
}

#[tokio::test]
async fn test_corrupt_contract_pinned_invalid() {
    let env = TestEnv::new();
    let alice = SigningKey::generate();
    let mut chain = env.create_chain("FAT-0", -1, vec![]);
    env.apply(&mut chain, vec![env.fat0_coinbase(&[(address_of(&alice), 1_000)])])
        .expect("mint");

    // The manifest declares one blob, the data-store serves another.
    let wasm = wat::parse_str(SPIN_AND_PAY_WAT).expect("wat");
    let first_entry = tally_fat::fat107::build_entry(&wasm, SPIN_AND_PAY_ABI);
    let contract_chain = first_entry.chain_id;
    env.client.add_contract(tally_state::ContractSource {
        first_entry,
        wasm: b"not the declared blob".to_vec(),
    });

    let bad = env.fat0_delegate(&alice, &[0x66; 32], 10, &contract_chain);
    let bad_hash = bad.hash();
    env.apply(&mut chain, vec![bad]).expect("block applies");
    assert_eq!(env.client.fetch_count(), 1);

    let handle = chain.handle();
    assert!(query::get_transaction(&handle, &bad_hash)
        .await
        .expect("query")
        .is_none());
    assert_eq!(query::get_balance(&handle, &[0x66; 32]).await.expect("balance"), 0);

    // A later delegation is rejected from the pinned row, without refetching.
    let retry = env.fat0_delegate(&alice, &[0x67; 32], 10, &contract_chain);
    let retry_hash = retry.hash();
    env.apply(&mut chain, vec![retry]).expect("block applies");
    assert_eq!(env.client.fetch_count(), 1);
    assert!(query::get_transaction(&handle, &retry_hash)
        .await
        .expect("query")
        .is_none());

    // Integrity validation skips the pinned row; nothing else is stored.
    chain.validate_contracts().expect("validate");
}

#[tokio::test]
async fn test_validate_and_cache_clear_survive_calls() {
    let (env, alice, bound, mut chain) = delegated_env().await;

    chain.validate_contracts().expect("stored contract verifies");

    // With the cache dropped, the next call recompiles from stored Wasm.
    chain.clear_contract_cache().expect("clear cache");
    env.apply(&mut chain, vec![env.fat0_call(&alice, &bound, 5, "remember", &[0x42])])
        .expect("call after cache clear");

    let handle = chain.handle();
    assert_eq!(query::get_balance(&handle, &bound).await.expect("balance"), 105);
}

#[tokio::test]
async fn test_second_delegation_reuses_stored_contract() {
    let (env, alice, _bound, mut chain) = delegated_env().await;
    let contract_chain = env.publish_contract(SPIN_AND_PAY_WAT, SPIN_AND_PAY_ABI);

    env.apply(
        &mut chain,
        vec![env.fat0_delegate(&alice, &[0x78; 32], 50, &contract_chain)],
    )
    .expect("second delegation");
    // Already ingested during the first delegation; no new fetch.
    assert_eq!(env.client.fetch_count(), 1);

    let handle = chain.handle();
    assert_eq!(query::get_balance(&handle, &[0x78; 32]).await.expect("balance"), 50);
}
