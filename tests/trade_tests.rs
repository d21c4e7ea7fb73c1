//! Trade derivation tests

use serde_json::json;
use solana_sdk::pubkey::Pubkey;

use dlmm_indexer::rpc::TransactionDetail;
use dlmm_indexer::trade::{derive_trade, PoolAccounts};

struct Balances<'a> {
    /// (account index, pre amount, post amount)
    entries: &'a [(usize, u64, u64)],
}

fn transaction(
    static_keys: &[String],
    loaded_writable: &[String],
    balances: Balances,
) -> TransactionDetail {
    let pre: Vec<_> = balances
        .entries
        .iter()
        .map(|(index, pre, _)| {
            json!({
                "accountIndex": index,
                "mint": "mint11111111111111111111111111111111111111111",
                "uiTokenAmount": { "amount": pre.to_string(), "decimals": 6 }
            })
        })
        .collect();
    let post: Vec<_> = balances
        .entries
        .iter()
        .map(|(index, _, post)| {
            json!({
                "accountIndex": index,
                "mint": "mint11111111111111111111111111111111111111111",
                "uiTokenAmount": { "amount": post.to_string(), "decimals": 6 }
            })
        })
        .collect();

    serde_json::from_value(json!({
        "slot": 250_000_000u64,
        "blockTime": 1_714_500_000i64,
        "transaction": {
            "signatures": ["sig11111"],
            "message": { "accountKeys": static_keys }
        },
        "meta": {
            "err": null,
            "logMessages": [],
            "preTokenBalances": pre,
            "postTokenBalances": post,
            "loadedAddresses": { "writable": loaded_writable, "readonly": [] }
        }
    }))
    .unwrap()
}

fn pool_accounts() -> PoolAccounts {
    PoolAccounts {
        pool: Pubkey::new_unique(),
        base_vault: Pubkey::new_unique(),
        quote_vault: Pubkey::new_unique(),
        base_mint: Pubkey::new_unique(),
        quote_mint: Pubkey::new_unique(),
    }
}

#[test]
fn no_trade_when_vaults_are_not_in_the_transaction() {
    let accounts = pool_accounts();
    let tx = transaction(
        &["payer".to_string(), "other".to_string()],
        &[],
        Balances { entries: &[] },
    );
    assert!(derive_trade(&tx, "sig", &accounts).is_none());
}

#[test]
fn no_trade_when_both_deltas_are_zero() {
    let accounts = pool_accounts();
    let tx = transaction(
        &[
            "payer".to_string(),
            accounts.base_vault.to_string(),
            accounts.quote_vault.to_string(),
        ],
        &[],
        Balances {
            entries: &[(1, 1_000, 1_000), (2, 2_000, 2_000)],
        },
    );
    assert!(derive_trade(&tx, "sig", &accounts).is_none());
}

#[test]
fn no_trade_when_both_vaults_move_the_same_way() {
    let accounts = pool_accounts();
    let tx = transaction(
        &[
            "payer".to_string(),
            accounts.base_vault.to_string(),
            accounts.quote_vault.to_string(),
        ],
        &[],
        Balances {
            // both increased: consistent with a deposit, not a swap
            entries: &[(1, 1_000, 2_000), (2, 2_000, 3_000)],
        },
    );
    assert!(derive_trade(&tx, "sig", &accounts).is_none());
}

#[test]
fn base_up_quote_down_sells_quote_for_base() {
    let accounts = pool_accounts();
    let tx = transaction(
        &[
            "payer".to_string(),
            accounts.base_vault.to_string(),
            accounts.quote_vault.to_string(),
        ],
        &[],
        Balances {
            // base vault +1_000_000, quote vault -500_000
            entries: &[(1, 9_000_000, 10_000_000), (2, 1_500_000, 1_000_000)],
        },
    );

    let trade = derive_trade(&tx, "sig11111", &accounts).expect("trade derives");
    assert_eq!(trade.input_mint, accounts.quote_mint.to_string());
    assert_eq!(trade.output_mint, accounts.base_mint.to_string());
    assert_eq!(trade.amount_in, "500000");
    assert_eq!(trade.amount_out, "1000000");
    assert_eq!(trade.slot, 250_000_000);
    assert_eq!(trade.block_time, Some(1_714_500_000));
    assert_eq!(trade.pool, accounts.pool.to_string());
}

#[test]
fn quote_up_base_down_swaps_the_direction() {
    let accounts = pool_accounts();
    let tx = transaction(
        &[
            "payer".to_string(),
            accounts.base_vault.to_string(),
            accounts.quote_vault.to_string(),
        ],
        &[],
        Balances {
            entries: &[(1, 10_000_000, 9_999_000), (2, 1_000_000, 1_002_500)],
        },
    );

    let trade = derive_trade(&tx, "sig", &accounts).unwrap();
    assert_eq!(trade.input_mint, accounts.base_mint.to_string());
    assert_eq!(trade.output_mint, accounts.quote_mint.to_string());
    assert_eq!(trade.amount_in, "1000");
    assert_eq!(trade.amount_out, "2500");
}

#[test]
fn vaults_reachable_only_through_loaded_addresses_still_derive() {
    let accounts = pool_accounts();
    // Static keys hold only the payer; the vaults come from the
    // versioned transaction's address table.
    let tx = transaction(
        &["payer".to_string()],
        &[
            accounts.base_vault.to_string(),
            accounts.quote_vault.to_string(),
        ],
        Balances {
            // unified indices: payer=0, base=1, quote=2
            entries: &[(1, 0, 300), (2, 700, 400)],
        },
    );

    let trade = derive_trade(&tx, "sig", &accounts).unwrap();
    assert_eq!(trade.amount_in, "300");
    assert_eq!(trade.amount_out, "300");
    assert_eq!(trade.input_mint, accounts.quote_mint.to_string());
}

#[test]
fn vault_absent_from_balance_lists_counts_as_zero_movement() {
    let accounts = pool_accounts();
    let tx = transaction(
        &[
            "payer".to_string(),
            accounts.base_vault.to_string(),
            accounts.quote_vault.to_string(),
        ],
        &[],
        Balances {
            // only the base vault appears; quote has zero movement
            entries: &[(1, 100, 900)],
        },
    );
    // base up, quote unmoved: not a swap
    assert!(derive_trade(&tx, "sig", &accounts).is_none());
}
