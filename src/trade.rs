//! Trade derivation
//!
//! Derives a canonical trade from a transaction's vault balance deltas.
//! This is a pure function: "no trade here" is a common, expected outcome
//! and is signaled as `None`, never as an error.

use solana_sdk::pubkey::Pubkey;

use crate::models::Trade;
use crate::rpc::{TokenBalance, TransactionDetail};
use crate::state::PoolState;

/// The pool accounts a derivation runs against.
#[derive(Debug, Clone)]
pub struct PoolAccounts {
    pub pool: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
}

impl From<&PoolState> for PoolAccounts {
    fn from(state: &PoolState) -> Self {
        Self {
            pool: state.address,
            base_vault: state.base_vault,
            quote_vault: state.quote_vault,
            base_mint: state.base_mint,
            quote_mint: state.quote_mint,
        }
    }
}

/// Derive a trade for `accounts` from `tx`, or `None` when the
/// transaction does not constitute a swap against this pool.
///
/// Both vaults must appear in the transaction's unified account-key list;
/// exactly one vault balance must increase and the other decrease.
/// Amounts are the absolute deltas in atomic units, rendered as decimal
/// strings. `txn_order` is left at 0 for the ordering layer to fill.
pub fn derive_trade(
    tx: &TransactionDetail,
    signature: &str,
    accounts: &PoolAccounts,
) -> Option<Trade> {
    let keys = tx.ordered_account_keys();
    let base_vault = accounts.base_vault.to_string();
    let quote_vault = accounts.quote_vault.to_string();

    let base_index = keys.iter().position(|k| *k == base_vault)?;
    let quote_index = keys.iter().position(|k| *k == quote_vault)?;

    let meta = tx.meta.as_ref()?;
    let pre = meta.pre_token_balances.as_deref().unwrap_or(&[]);
    let post = meta.post_token_balances.as_deref().unwrap_or(&[]);

    let base_delta = balance_delta(pre, post, base_index);
    let quote_delta = balance_delta(pre, post, quote_index);

    // A swap moves the vaults in opposite directions. Anything else,
    // including no movement at all, is not a trade. A growing base vault
    // means quote was sold for base: input is the quote side, output the
    // base side, and vice versa.
    let (input_mint, output_mint, amount_in, amount_out) = if base_delta > 0 && quote_delta < 0 {
        (
            accounts.quote_mint,
            accounts.base_mint,
            quote_delta.unsigned_abs(),
            base_delta.unsigned_abs(),
        )
    } else if quote_delta > 0 && base_delta < 0 {
        (
            accounts.base_mint,
            accounts.quote_mint,
            base_delta.unsigned_abs(),
            quote_delta.unsigned_abs(),
        )
    } else {
        return None;
    };

    Some(Trade {
        signature: signature.to_string(),
        slot: tx.slot,
        block_time: tx.block_time,
        pool: accounts.pool.to_string(),
        user: None,
        input_mint: input_mint.to_string(),
        output_mint: output_mint.to_string(),
        amount_in: amount_in.to_string(),
        amount_out: amount_out.to_string(),
        txn_order: 0,
    })
}

/// Signed post-minus-pre movement for one account index. An account
/// absent from a balance list contributes zero, not "missing".
fn balance_delta(pre: &[TokenBalance], post: &[TokenBalance], account_index: usize) -> i128 {
    let pre_amount = amount_at(pre, account_index);
    let post_amount = amount_at(post, account_index);
    post_amount - pre_amount
}

fn amount_at(balances: &[TokenBalance], account_index: usize) -> i128 {
    balances
        .iter()
        .find(|b| b.account_index == account_index)
        .and_then(|b| b.ui_token_amount.amount.parse::<i128>().ok())
        .unwrap_or(0)
}
