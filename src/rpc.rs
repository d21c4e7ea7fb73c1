//! Lightweight Solana RPC client
//!
//! A minimal JSON-RPC client that implements only the methods the indexer
//! actually needs, avoiding the heavy dependency chain of solana-client.

use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::{account::Account, pubkey::Pubkey};
use tracing::debug;

use crate::error::RpcError;

/// Lightweight RPC client for Solana
pub struct RpcClient {
    url: String,
    commitment: String,
    agent: ureq::Agent,
}

/// RPC error structure
#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Account data response from RPC
#[derive(Debug, Deserialize)]
struct AccountInfo {
    lamports: u64,
    data: (String, String), // (data, encoding)
    owner: String,
    executable: bool,
    #[serde(rename = "rentEpoch")]
    rent_epoch: u64,
}

/// One entry of a getProgramAccounts response
#[derive(Debug, Deserialize)]
struct KeyedAccount {
    pubkey: String,
    account: AccountInfo,
}

/// Full transaction detail as returned by getTransaction with json
/// encoding. Only the fields the pipeline consumes are modeled.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetail {
    pub slot: u64,
    pub block_time: Option<i64>,
    pub transaction: TransactionEnvelope,
    pub meta: Option<TransactionMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionEnvelope {
    pub signatures: Vec<String>,
    pub message: TransactionMessage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMessage {
    pub account_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    pub err: Option<Value>,
    #[serde(default)]
    pub log_messages: Option<Vec<String>>,
    #[serde(default)]
    pub pre_token_balances: Option<Vec<TokenBalance>>,
    #[serde(default)]
    pub post_token_balances: Option<Vec<TokenBalance>>,
    #[serde(default)]
    pub loaded_addresses: Option<LoadedAddresses>,
}

/// Token balance entry from transaction metadata
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub account_index: usize,
    pub mint: String,
    pub ui_token_amount: UiTokenAmount,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiTokenAmount {
    /// Raw amount in atomic units, as a decimal string.
    pub amount: String,
    pub decimals: u8,
}

/// Address-table addresses loaded by a versioned transaction
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadedAddresses {
    #[serde(default)]
    pub writable: Vec<String>,
    #[serde(default)]
    pub readonly: Vec<String>,
}

impl TransactionDetail {
    /// All account addresses of the transaction in index order: static
    /// message keys first, then address-table writable and readonly
    /// addresses. Token-balance `account_index` values refer into this
    /// unified list regardless of transaction version.
    pub fn ordered_account_keys(&self) -> Vec<String> {
        let mut keys = self.transaction.message.account_keys.clone();
        if let Some(meta) = &self.meta {
            if let Some(loaded) = &meta.loaded_addresses {
                keys.extend(loaded.writable.iter().cloned());
                keys.extend(loaded.readonly.iter().cloned());
            }
        }
        keys
    }

    /// Whether on-chain execution of the transaction failed.
    pub fn is_failed(&self) -> bool {
        self.meta
            .as_ref()
            .map(|m| m.err.is_some())
            .unwrap_or(false)
    }

    pub fn log_messages(&self) -> &[String] {
        self.meta
            .as_ref()
            .and_then(|m| m.log_messages.as_deref())
            .unwrap_or(&[])
    }

    /// The fee payer (first static account key).
    pub fn fee_payer(&self) -> Option<&str> {
        self.transaction
            .message
            .account_keys
            .first()
            .map(|s| s.as_str())
    }
}

/// Block response when only transaction signatures are requested
#[derive(Debug, Deserialize)]
struct BlockSignatures {
    #[serde(default)]
    signatures: Vec<String>,
}

impl RpcClient {
    pub fn new(url: String, commitment: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(30))
            .build();

        Self {
            url,
            commitment,
            agent,
        }
    }

    /// Make a JSON-RPC call, returning the raw `result` value. A JSON
    /// `null` result is valid (e.g. getTransaction on an unknown
    /// signature), so typed decoding is left to the caller.
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let request_body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        debug!("RPC call: {}", method);

        // ureq is sync, so run the request on the blocking pool
        let response_body = tokio::task::spawn_blocking({
            let agent = self.agent.clone();
            let url = self.url.clone();
            let body = request_body.to_string();

            move || {
                let response = agent
                    .post(&url)
                    .set("Content-Type", "application/json")
                    .send_string(&body)?;
                let text = response.into_string()?;
                Ok::<String, ureq::Error>(text)
            }
        })
        .await
        .map_err(|e| RpcError::ConnectionFailed(e.to_string()))?
        .map_err(|e| RpcError::ConnectionFailed(e.to_string()))?;

        let mut envelope: Value = serde_json::from_str(&response_body)?;

        if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
            let body: RpcErrorBody = serde_json::from_value(error.clone())?;
            return Err(RpcError::Node {
                code: body.code,
                message: body.message,
            });
        }

        match envelope.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Err(RpcError::MalformedResponse(
                "no result in RPC response".to_string(),
            )),
        }
    }

    /// Get account information, `None` if the account does not exist
    pub async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, RpcError> {
        let params = json!([
            pubkey.to_string(),
            {
                "encoding": "base64",
                "commitment": self.commitment,
            }
        ]);

        let response = self.call("getAccountInfo", params).await?;

        if response["value"].is_null() {
            return Ok(None);
        }

        let info: AccountInfo = serde_json::from_value(response["value"].clone())?;
        Ok(Some(decode_account(info)?))
    }

    /// Fetch full transaction detail by signature, `None` if unavailable
    pub async fn get_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<TransactionDetail>, RpcError> {
        let params = json!([
            signature,
            {
                "encoding": "json",
                "commitment": self.commitment,
                "maxSupportedTransactionVersion": 0,
            }
        ]);

        let response = self.call("getTransaction", params).await?;
        if response.is_null() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_value(response)?))
    }

    /// The ordered signature list of a block. Used for within-block
    /// transaction ordering, so availability is best-effort at the caller.
    pub async fn get_block_signatures(&self, slot: u64) -> Result<Vec<String>, RpcError> {
        let params = json!([
            slot,
            {
                "transactionDetails": "signatures",
                "rewards": false,
                "commitment": self.commitment,
                "maxSupportedTransactionVersion": 0,
            }
        ]);

        let response = self.call("getBlock", params).await?;
        let block: BlockSignatures = serde_json::from_value(response)?;
        Ok(block.signatures)
    }

    /// Program-owned accounts whose data starts with the given 8-byte
    /// discriminator, truncated to `limit` entries.
    pub async fn get_program_accounts_by_discriminator(
        &self,
        program_id: &Pubkey,
        discriminator: &[u8; 8],
        limit: usize,
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, RpcError> {
        let params = json!([
            program_id.to_string(),
            {
                "encoding": "base64",
                "commitment": self.commitment,
                "filters": [
                    { "memcmp": { "offset": 0, "bytes": bs58::encode(discriminator).into_string() } }
                ],
            }
        ]);

        let response = self.call("getProgramAccounts", params).await?;
        let response: Vec<KeyedAccount> = serde_json::from_value(response)?;

        let mut accounts = Vec::new();
        for keyed in response.into_iter().take(limit) {
            let pubkey: Pubkey = keyed
                .pubkey
                .parse()
                .map_err(|_| RpcError::MalformedResponse(format!("bad pubkey {}", keyed.pubkey)))?;
            let account = decode_account(keyed.account)?;
            accounts.push((pubkey, account.data));
        }

        Ok(accounts)
    }
}

fn decode_account(info: AccountInfo) -> Result<Account, RpcError> {
    if info.data.1 != "base64" {
        return Err(RpcError::MalformedResponse(format!(
            "unsupported account encoding: {}",
            info.data.1
        )));
    }

    let data = general_purpose::STANDARD
        .decode(&info.data.0)
        .map_err(|e| RpcError::MalformedResponse(format!("bad account data: {}", e)))?;

    let owner = info
        .owner
        .parse()
        .map_err(|_| RpcError::MalformedResponse(format!("bad owner pubkey: {}", info.owner)))?;

    Ok(Account {
        lamports: info.lamports,
        data,
        owner,
        executable: info.executable,
        rent_epoch: info.rent_epoch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transaction_json() -> Value {
        json!({
            "slot": 250_100_200u64,
            "blockTime": 1_714_000_000i64,
            "transaction": {
                "signatures": ["5sig111"],
                "message": {
                    "accountKeys": ["payer111", "vaultA111", "program111"],
                    "instructions": [],
                }
            },
            "meta": {
                "err": null,
                "logMessages": ["Program log: hello"],
                "preTokenBalances": [
                    { "accountIndex": 1, "mint": "mintA", "uiTokenAmount": { "amount": "100", "decimals": 6, "uiAmount": 0.0001, "uiAmountString": "0.0001" } }
                ],
                "postTokenBalances": [
                    { "accountIndex": 1, "mint": "mintA", "uiTokenAmount": { "amount": "175", "decimals": 6, "uiAmount": 0.000175, "uiAmountString": "0.000175" } }
                ],
                "loadedAddresses": { "writable": ["vaultB222"], "readonly": ["lut333"] }
            }
        })
    }

    #[test]
    fn transaction_detail_unifies_account_keys() {
        let detail: TransactionDetail =
            serde_json::from_value(sample_transaction_json()).unwrap();
        let keys = detail.ordered_account_keys();
        assert_eq!(
            keys,
            vec!["payer111", "vaultA111", "program111", "vaultB222", "lut333"]
        );
        assert!(!detail.is_failed());
        assert_eq!(detail.fee_payer(), Some("payer111"));
        assert_eq!(detail.log_messages().len(), 1);
    }

    #[test]
    fn failed_execution_is_detected() {
        let mut value = sample_transaction_json();
        value["meta"]["err"] = json!({"InstructionError": [0, "Custom"]});
        let detail: TransactionDetail = serde_json::from_value(value).unwrap();
        assert!(detail.is_failed());
    }
}
