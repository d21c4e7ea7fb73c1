//! On-chain state reader
//!
//! Fetches and decodes current pool and bin state on demand. Nothing here
//! owns writes: the chain is authoritative and every pool read is fresh.
//! The only cached facts are mint decimal precisions, which are immutable
//! once a mint exists.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::error::{IndexerError, IndexerResult};
use crate::rpc::RpcClient;

/// Account discriminator for pool records.
pub const POOL_DISCRIMINATOR: [u8; 8] = [241, 14, 109, 4, 17, 177, 109, 188];

/// Account discriminator for bin records.
pub const BIN_DISCRIMINATOR: [u8; 8] = [86, 16, 201, 58, 99, 140, 21, 7];

/// Fixed pool account length: discriminator, 7 pubkeys, q64.64 price,
/// two bin ids, bin step, base fee, pause flag.
pub const POOL_ACCOUNT_LEN: usize = 8 + 7 * 32 + 16 + 4 + 4 + 2 + 2 + 1;

/// Fixed bin account length.
pub const BIN_ACCOUNT_LEN: usize = 8 + 32 + 4 + 8 + 8;

/// Decoded pool state.
///
/// `price_x64` is only meaningful relative to the mint decimals; callers
/// needing a display price go through [`PoolState::ui_price`], which is
/// absent until both decimals are known.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub address: Pubkey,
    pub program_id: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub base_fee_vault: Option<Pubkey>,
    pub quote_fee_vault: Option<Pubkey>,
    pub admin: Pubkey,
    /// Current price, 64.64 fixed point (quote per base, atomic units).
    pub price_x64: u128,
    pub active_bin_id: i32,
    pub initial_bin_id: i32,
    pub bin_step: u16,
    pub base_fee_bps: u16,
    pub paused: bool,
    pub base_decimals: Option<u8>,
    pub quote_decimals: Option<u8>,
}

impl PoolState {
    /// Decode a pool account buffer. Decimals start out unknown; the
    /// reader fills them from the mint cache.
    pub fn decode(address: Pubkey, program_id: Pubkey, data: &[u8]) -> IndexerResult<Self> {
        if data.len() < POOL_ACCOUNT_LEN || data[..8] != POOL_DISCRIMINATOR {
            return Err(IndexerError::Decode {
                account_type: "Pool".to_string(),
                reason: format!("unexpected layout ({} bytes)", data.len()),
            });
        }

        let base_fee_vault = read_pubkey(data, 136);
        let quote_fee_vault = read_pubkey(data, 168);

        Ok(Self {
            address,
            program_id,
            base_mint: read_pubkey(data, 8),
            quote_mint: read_pubkey(data, 40),
            base_vault: read_pubkey(data, 72),
            quote_vault: read_pubkey(data, 104),
            base_fee_vault: non_default(base_fee_vault),
            quote_fee_vault: non_default(quote_fee_vault),
            admin: read_pubkey(data, 200),
            price_x64: u128::from_le_bytes(data[232..248].try_into().unwrap()),
            active_bin_id: i32::from_le_bytes(data[248..252].try_into().unwrap()),
            initial_bin_id: i32::from_le_bytes(data[252..256].try_into().unwrap()),
            bin_step: u16::from_le_bytes(data[256..258].try_into().unwrap()),
            base_fee_bps: u16::from_le_bytes(data[258..260].try_into().unwrap()),
            paused: data[260] != 0,
            base_decimals: None,
            quote_decimals: None,
        })
    }

    /// Decimal-adjusted display price, when both mint precisions are known.
    pub fn ui_price(&self) -> Option<f64> {
        let base = self.base_decimals? as i32;
        let quote = self.quote_decimals? as i32;
        let raw = self.price_x64 as f64 / 2f64.powi(64);
        Some(raw * 10f64.powi(base - quote))
    }
}

/// Per-bin reserves. A missing bin account is a valid state distinct from
/// zero reserves, so absence is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinReserves {
    Known { base: u64, quote: u64 },
    Unknown,
}

impl BinReserves {
    pub fn decode(data: &[u8]) -> BinReserves {
        if data.len() < BIN_ACCOUNT_LEN || data[..8] != BIN_DISCRIMINATOR {
            return BinReserves::Unknown;
        }
        BinReserves::Known {
            base: u64::from_le_bytes(data[44..52].try_into().unwrap()),
            quote: u64::from_le_bytes(data[52..60].try_into().unwrap()),
        }
    }
}

/// On-demand reader for pool, bin, and mint accounts.
pub struct StateReader {
    rpc: Arc<RpcClient>,
    program_id: Pubkey,
    decimals: Mutex<HashMap<Pubkey, u8>>,
}

impl StateReader {
    pub fn new(rpc: Arc<RpcClient>, program_id: Pubkey) -> Self {
        Self {
            rpc,
            program_id,
            decimals: Mutex::new(HashMap::new()),
        }
    }

    /// Read and decode the current state of a pool, including mint
    /// decimals resolved through the cache.
    pub async fn read_pool_state(&self, pool: &Pubkey) -> IndexerResult<PoolState> {
        let account = self
            .rpc
            .get_account(pool)
            .await?
            .ok_or_else(|| IndexerError::AccountNotFound {
                address: pool.to_string(),
            })?;

        let mut state = PoolState::decode(*pool, self.program_id, &account.data)?;
        state.base_decimals = Some(self.get_decimals(&state.base_mint).await?);
        state.quote_decimals = Some(self.get_decimals(&state.quote_mint).await?);
        Ok(state)
    }

    /// Best-effort read of one bin's reserves. Any failure, including a
    /// missing account, degrades to `Unknown`; this call never errors.
    pub async fn read_bin_reserves(&self, pool: &Pubkey, bin_id: i32) -> BinReserves {
        let address = bin_address(&self.program_id, pool, bin_id);
        match self.rpc.get_account(&address).await {
            Ok(Some(account)) => BinReserves::decode(&account.data),
            Ok(None) => BinReserves::Unknown,
            Err(e) => {
                debug!("bin reserve fetch failed for {} bin {}: {}", pool, bin_id, e);
                BinReserves::Unknown
            }
        }
    }

    /// Mint decimal precision through the process-lifetime cache. The
    /// cache is never invalidated: decimals are immutable once set.
    pub async fn get_decimals(&self, mint: &Pubkey) -> IndexerResult<u8> {
        if let Some(d) = self.decimals.lock().unwrap().get(mint) {
            return Ok(*d);
        }

        let account =
            self.rpc
                .get_account(mint)
                .await?
                .ok_or_else(|| IndexerError::InvalidMint {
                    mint: mint.to_string(),
                })?;

        let parsed =
            spl_token::state::Mint::unpack(&account.data).map_err(|_| IndexerError::InvalidMint {
                mint: mint.to_string(),
            })?;

        self.decimals
            .lock()
            .unwrap()
            .insert(*mint, parsed.decimals);
        Ok(parsed.decimals)
    }

    /// Scan for pool accounts by discriminator prefix, capped to bound
    /// the blast radius of an unindexed RPC call.
    pub async fn discover_pools(&self, limit: usize) -> IndexerResult<Vec<Pubkey>> {
        let accounts = self
            .rpc
            .get_program_accounts_by_discriminator(&self.program_id, &POOL_DISCRIMINATOR, limit)
            .await?;

        let mut pools = Vec::with_capacity(accounts.len());
        for (address, data) in accounts {
            match PoolState::decode(address, self.program_id, &data) {
                Ok(_) => pools.push(address),
                Err(e) => warn!("skipping undecodable pool candidate {}: {}", address, e),
            }
        }
        Ok(pools)
    }
}

/// Derive the bin account address for (pool, bin_id).
pub fn bin_address(program_id: &Pubkey, pool: &Pubkey, bin_id: i32) -> Pubkey {
    Pubkey::find_program_address(
        &[b"bin", pool.as_ref(), &bin_id.to_le_bytes()],
        program_id,
    )
    .0
}

fn read_pubkey(data: &[u8], offset: usize) -> Pubkey {
    Pubkey::new_from_array(data[offset..offset + 32].try_into().unwrap())
}

fn non_default(key: Pubkey) -> Option<Pubkey> {
    if key == Pubkey::default() {
        None
    } else {
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_account_data(
        base_mint: Pubkey,
        quote_mint: Pubkey,
        base_vault: Pubkey,
        quote_vault: Pubkey,
        price_x64: u128,
        active_bin_id: i32,
    ) -> Vec<u8> {
        let mut data = vec![0u8; POOL_ACCOUNT_LEN];
        data[..8].copy_from_slice(&POOL_DISCRIMINATOR);
        data[8..40].copy_from_slice(base_mint.as_ref());
        data[40..72].copy_from_slice(quote_mint.as_ref());
        data[72..104].copy_from_slice(base_vault.as_ref());
        data[104..136].copy_from_slice(quote_vault.as_ref());
        // fee vaults left zeroed (absent)
        data[200..232].copy_from_slice(Pubkey::new_unique().as_ref());
        data[232..248].copy_from_slice(&price_x64.to_le_bytes());
        data[248..252].copy_from_slice(&active_bin_id.to_le_bytes());
        data[252..256].copy_from_slice(&(-10i32).to_le_bytes());
        data[256..258].copy_from_slice(&25u16.to_le_bytes());
        data[258..260].copy_from_slice(&30u16.to_le_bytes());
        data[260] = 0;
        data
    }

    #[test]
    fn pool_account_round_trips_through_decode() {
        let base_mint = Pubkey::new_unique();
        let quote_mint = Pubkey::new_unique();
        let base_vault = Pubkey::new_unique();
        let quote_vault = Pubkey::new_unique();
        let price = 37u128 << 64;

        let data = pool_account_data(base_mint, quote_mint, base_vault, quote_vault, price, 42);
        let pool = Pubkey::new_unique();
        let state = PoolState::decode(pool, Pubkey::new_unique(), &data).unwrap();

        assert_eq!(state.base_mint, base_mint);
        assert_eq!(state.quote_vault, quote_vault);
        assert_eq!(state.price_x64, price);
        assert_eq!(state.active_bin_id, 42);
        assert_eq!(state.initial_bin_id, -10);
        assert_eq!(state.bin_step, 25);
        assert_eq!(state.base_fee_bps, 30);
        assert!(!state.paused);
        // zeroed fee vaults decode as absent, not as the default pubkey
        assert_eq!(state.base_fee_vault, None);
        assert_eq!(state.quote_fee_vault, None);
    }

    #[test]
    fn wrong_discriminator_is_a_decode_error() {
        let mut data = vec![0u8; POOL_ACCOUNT_LEN];
        data[..8].copy_from_slice(&[9u8; 8]);
        let err = PoolState::decode(Pubkey::new_unique(), Pubkey::new_unique(), &data);
        assert!(matches!(err, Err(IndexerError::Decode { .. })));
    }

    #[test]
    fn ui_price_requires_decimals() {
        let data = pool_account_data(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            1u128 << 64,
            0,
        );
        let mut state =
            PoolState::decode(Pubkey::new_unique(), Pubkey::new_unique(), &data).unwrap();
        assert_eq!(state.ui_price(), None);

        state.base_decimals = Some(9);
        state.quote_decimals = Some(6);
        let price = state.ui_price().unwrap();
        assert!((price - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn missing_bin_layout_is_unknown_not_zero() {
        assert_eq!(BinReserves::decode(&[]), BinReserves::Unknown);
        assert_eq!(BinReserves::decode(&[0u8; 16]), BinReserves::Unknown);

        let mut data = vec![0u8; BIN_ACCOUNT_LEN];
        data[..8].copy_from_slice(&BIN_DISCRIMINATOR);
        data[44..52].copy_from_slice(&5u64.to_le_bytes());
        data[52..60].copy_from_slice(&7u64.to_le_bytes());
        assert_eq!(
            BinReserves::decode(&data),
            BinReserves::Known { base: 5, quote: 7 }
        );
    }

    #[test]
    fn bin_address_is_deterministic() {
        let program = Pubkey::new_unique();
        let pool = Pubkey::new_unique();
        assert_eq!(bin_address(&program, &pool, 7), bin_address(&program, &pool, 7));
        assert_ne!(bin_address(&program, &pool, 7), bin_address(&program, &pool, 8));
    }
}
