//! JSON-RPC wallet client and the address book loader.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use parlance_core::wallet::{AddressBook, Wallet};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;

const WEI_PER_ETH: f64 = 1e18;

/// Minimal Ethereum JSON-RPC wallet: balance reads and value transfers from a
/// node-managed account. Anything fancier belongs to a real wallet SDK.
pub struct RpcWallet {
    http: reqwest::Client,
    url: String,
    address: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    message: String,
}

impl RpcWallet {
    pub fn new(url: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            address: address.into(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("rpc {method}"))?
            .error_for_status()?
            .json()
            .await?;
        if let Some(error) = response.error {
            return Err(anyhow!("{method}: {}", error.message));
        }
        response
            .result
            .ok_or_else(|| anyhow!("{method}: empty result"))
    }
}

#[async_trait]
impl Wallet for RpcWallet {
    async fn address(&self) -> anyhow::Result<String> {
        Ok(self.address.clone())
    }

    async fn balance(&self) -> anyhow::Result<String> {
        let result = self
            .call("eth_getBalance", json!([self.address, "latest"]))
            .await?;
        let hex = result
            .as_str()
            .ok_or_else(|| anyhow!("eth_getBalance: non-string result"))?;
        Ok(format!("{:.4} ETH", wei_hex_to_eth(hex)?))
    }

    async fn transfer(&self, to: &str, amount_eth: f64) -> anyhow::Result<String> {
        let tx = json!([{
            "from": self.address,
            "to": to,
            "value": eth_to_wei_hex(amount_eth)?,
        }]);
        let result = self.call("eth_sendTransaction", tx).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("eth_sendTransaction: non-string result"))
    }
}

/// Wallet used when no RPC endpoint is configured; every operation reports
/// the missing configuration as an ordinary tool-visible error.
pub struct UnconfiguredWallet;

#[async_trait]
impl Wallet for UnconfiguredWallet {
    async fn address(&self) -> anyhow::Result<String> {
        Err(anyhow!("wallet is not configured (set ETH_RPC_URL and WALLET_ADDRESS)"))
    }

    async fn balance(&self) -> anyhow::Result<String> {
        Err(anyhow!("wallet is not configured (set ETH_RPC_URL and WALLET_ADDRESS)"))
    }

    async fn transfer(&self, _to: &str, _amount_eth: f64) -> anyhow::Result<String> {
        Err(anyhow!("wallet is not configured (set ETH_RPC_URL and WALLET_ADDRESS)"))
    }
}

fn wei_hex_to_eth(hex: &str) -> anyhow::Result<f64> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    let wei = u128::from_str_radix(digits, 16).with_context(|| format!("parsing wei '{hex}'"))?;
    Ok(wei as f64 / WEI_PER_ETH)
}

fn eth_to_wei_hex(amount_eth: f64) -> anyhow::Result<String> {
    if !amount_eth.is_finite() || amount_eth < 0.0 {
        return Err(anyhow!("invalid transfer amount {amount_eth}"));
    }
    let wei = (amount_eth * WEI_PER_ETH) as u128;
    Ok(format!("{wei:#x}"))
}

/// Loads a `{ "Name": "0x..." }` JSON file into an address book. A missing
/// path yields an empty book.
pub fn load_address_book(path: Option<&Path>) -> anyhow::Result<AddressBook> {
    let Some(path) = path else {
        return Ok(AddressBook::empty());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading address book {}", path.display()))?;
    let entries: BTreeMap<String, String> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(AddressBook::new(entries))
}
