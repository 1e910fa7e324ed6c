//! FAT-1 scenarios: minting, ownership transfer, mint uniqueness and
//! per-token metadata.

use tally_crypto::ed25519::SigningKey;
use tally_integration_tests::{address_of, TestEnv};
use tally_state::query;

#[tokio::test]
async fn test_nf_transfer_moves_ownership() {
    let env = TestEnv::new();
    let alice = SigningKey::generate();
    let bob = SigningKey::generate();
    let mut chain = env.create_chain("FAT-1", -1, vec![]);

    env.apply(&mut chain, vec![env.fat1_coinbase(&address_of(&alice), &[1, 2, 3])])
        .expect("mint");
    assert_eq!(chain.state.num_issued, 3);

    env.apply(&mut chain, vec![env.fat1_transfer(&alice, &address_of(&bob), &[2])])
        .expect("transfer");

    let handle = chain.handle();
    for (nf_id, owner) in [(1, address_of(&alice)), (2, address_of(&bob)), (3, address_of(&alice))] {
        let record = query::get_nf_token(&handle, nf_id)
            .await
            .expect("query")
            .expect("minted");
        assert_eq!(record.owner, owner, "owner of NFToken{{{nf_id}}}");
    }
    // FAT-1 balances count held tokens.
    assert_eq!(query::get_balance(&handle, &address_of(&alice)).await.expect("balance"), 2);
    assert_eq!(query::get_balance(&handle, &address_of(&bob)).await.expect("balance"), 1);
}

#[tokio::test]
async fn test_transfer_of_unowned_token_rejected() {
    let env = TestEnv::new();
    let alice = SigningKey::generate();
    let bob = SigningKey::generate();
    let mut chain = env.create_chain("FAT-1", -1, vec![]);

    env.apply(&mut chain, vec![env.fat1_coinbase(&address_of(&alice), &[1, 2, 3])])
        .expect("mint");
    env.apply(&mut chain, vec![env.fat1_transfer(&alice, &address_of(&bob), &[2])])
        .expect("transfer");

    // Alice no longer owns 2; the re-send persists invalid and changes nothing.
    let stale = env.fat1_transfer(&alice, &address_of(&bob), &[2]);
    let stale_hash = stale.hash();
    env.apply(&mut chain, vec![stale]).expect("block applies");

    let handle = chain.handle();
    let record = query::get_nf_token(&handle, 2).await.expect("query").expect("minted");
    assert_eq!(record.owner, address_of(&bob));
    assert_eq!(query::get_balance(&handle, &address_of(&alice)).await.expect("balance"), 2);
    assert!(query::get_transaction(&handle, &stale_hash)
        .await
        .expect("query")
        .is_none());
}

#[tokio::test]
async fn test_nf_id_mints_at_most_once() {
    let env = TestEnv::new();
    let alice = SigningKey::generate();
    let bob = SigningKey::generate();
    let mut chain = env.create_chain("FAT-1", -1, vec![]);

    env.apply(&mut chain, vec![env.fat1_coinbase(&address_of(&alice), &[1, 2, 3])])
        .expect("mint");

    // Id 2 again, to a different address: rejected wholesale.
    env.apply(&mut chain, vec![env.fat1_coinbase(&address_of(&bob), &[2, 4])])
        .expect("block applies");

    let handle = chain.handle();
    assert_eq!(chain.state.num_issued, 3);
    let record = query::get_nf_token(&handle, 2).await.expect("query").expect("minted");
    assert_eq!(record.owner, address_of(&alice));
    // Id 4 was in the rejected mint; it does not exist.
    assert!(query::get_nf_token(&handle, 4).await.expect("query").is_none());
    assert_eq!(query::get_balance(&handle, &address_of(&bob)).await.expect("balance"), 0);
}

#[tokio::test]
async fn test_supply_cap_counts_tokens() {
    let env = TestEnv::new();
    let alice = SigningKey::generate();
    let mut chain = env.create_chain("FAT-1", 3, vec![]);

    env.apply(&mut chain, vec![env.fat1_coinbase(&address_of(&alice), &[1, 2, 3])])
        .expect("mint to cap");
    assert_eq!(chain.state.num_issued, 3);

    env.apply(&mut chain, vec![env.fat1_coinbase(&address_of(&alice), &[4])])
        .expect("block applies");
    assert_eq!(chain.state.num_issued, 3);
    let handle = chain.handle();
    assert!(query::get_nf_token(&handle, 4).await.expect("query").is_none());
}

#[tokio::test]
async fn test_token_metadata_stored_on_mint() {
    let env = TestEnv::new();
    let alice = SigningKey::generate();
    let mut chain = env.create_chain("FAT-1", -1, vec![]);

    let mint = env.signed(
        serde_json::json!({
            "inputs": { hex::encode([0u8; 32]): [7] },
            "outputs": { hex::encode(address_of(&alice)): [7] },
            "tokenmetadata": { "7": {"name": "seven"} },
        }),
        &[&env.id1],
    );
    env.apply(&mut chain, vec![mint]).expect("mint");

    let handle = chain.handle();
    let record = query::get_nf_token(&handle, 7).await.expect("query").expect("minted");
    let metadata: serde_json::Value =
        serde_json::from_slice(&record.metadata.expect("metadata")).expect("json");
    assert_eq!(metadata["name"], "seven");
}
