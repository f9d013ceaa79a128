use std::fmt;
use std::str::FromStr;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::requests::get_reqwest_client;

pub const SUI_COIN_TYPE: &str = "0x2::sui::SUI";
pub const SUI_DECIMALS: u32 = 9;
pub const MIST_PER_SUI: u64 = 1_000_000_000;

pub const EXPLORER_URL: &str = "https://suivision.xyz";

const DEFAULT_RPC_URLS: &[&str] = &[
    "https://fullnode.mainnet.sui.io:443",
    "https://sui-mainnet-endpoint.blockvision.org",
];

fn rpc_urls() -> Vec<String> {
    let mut urls: Vec<String> = DEFAULT_RPC_URLS.iter().map(|url| url.to_string()).collect();
    if let Ok(custom) = std::env::var("SUI_RPC_URL") {
        urls = custom
            .split(',')
            .map(|url| url.trim().to_string())
            .chain(urls)
            .collect();
    }
    urls
}

/// A fully-qualified Sui coin type tag: `0x<package>::<module>::<name>`.
/// The package address must be the full 64-hex-character form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoinType {
    package: String,
    module: String,
    name: String,
}

impl CoinType {
    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `0x123456...cdef::NAME`, for places where the full tag is too long.
    pub fn short(&self) -> String {
        format!("{}::{}", shorten_address(&self.package, 6), self.name)
    }
}

impl fmt::Display for CoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.package, self.module, self.name)
    }
}

fn is_valid_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl FromStr for CoinType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split("::");
        let (Some(package), Some(module), Some(name), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(anyhow::anyhow!("Expected 0x<package>::<module>::<name>"));
        };
        let Some(hex) = package.strip_prefix("0x") else {
            return Err(anyhow::anyhow!("Package address must start with 0x"));
        };
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow::anyhow!(
                "Package address must be 64 hex characters"
            ));
        }
        if !is_valid_ident(module) || !is_valid_ident(name) {
            return Err(anyhow::anyhow!("Invalid module or type name"));
        }
        Ok(Self {
            package: format!("0x{}", hex.to_lowercase()),
            module: module.to_string(),
            name: name.to_string(),
        })
    }
}

impl Serialize for CoinType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CoinType {
    fn deserialize<D>(deserializer: D) -> Result<CoinType, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Keeps the first `keep` characters and the last 4.
pub fn shorten_address(address: &str, keep: usize) -> String {
    if address.len() <= keep + 4 {
        return address.to_string();
    }
    format!("{}...{}", &address[..keep], &address[address.len() - 4..])
}

/// Loose shape check for a transaction digest, to reject obvious typos
/// before spending an RPC call on them.
pub fn looks_like_digest(s: &str) -> bool {
    (32..=64).contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphanumeric())
}

#[derive(Deserialize, Debug)]
pub struct RpcResponse<T> {
    #[allow(dead_code)]
    id: serde_json::Value,
    #[allow(dead_code)]
    jsonrpc: String,
    pub result: T,
}

pub async fn rpc<I: Serialize, O: DeserializeOwned>(data: I) -> Result<O, anyhow::Error> {
    let mut last_error = None;
    for url in rpc_urls() {
        let result: Result<O, anyhow::Error> = async {
            let response = get_reqwest_client()
                .post(&url)
                .json(&data)
                .send()
                .await?
                .json::<serde_json::Value>()
                .await?;
            match serde_json::from_value::<RpcResponse<O>>(response.clone()) {
                Ok(parsed) => Ok(parsed.result),
                Err(_) => Err(anyhow::anyhow!("RPC error: {response:?}")),
            }
        }
        .await;
        match result {
            Ok(result) => return Ok(result),
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No RPC URLs configured")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionBlockResponse {
    effects: Option<TransactionEffects>,
    balance_changes: Option<Vec<BalanceChange>>,
}

#[derive(Debug, Deserialize)]
struct TransactionEffects {
    status: ExecutionStatus,
}

#[derive(Debug, Deserialize)]
struct ExecutionStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceChange {
    owner: Owner,
    coin_type: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
enum Owner {
    AddressOwner(String),
    ObjectOwner(String),
    Shared(serde_json::Value),
    Immutable,
}

/// Checks that `digest` is a successful transaction that credits
/// `receiver` with at least `expected_sui` SUI.
///
/// `Ok(false)` means the chain answered and the payment doesn't check out;
/// `Err` means we couldn't get an answer and the caller may retry.
pub async fn verify_payment(
    digest: &str,
    expected_sui: f64,
    receiver: &str,
) -> Result<bool, anyhow::Error> {
    let expected_mist = (expected_sui * MIST_PER_SUI as f64) as i128;
    let response: TransactionBlockResponse = rpc(serde_json::json!({
        "jsonrpc": "2.0",
        "id": "dontcare",
        "method": "sui_getTransactionBlock",
        "params": [digest, { "showEffects": true, "showBalanceChanges": true }],
    }))
    .await?;
    let Some(effects) = response.effects else {
        return Ok(false);
    };
    if effects.status.status != "success" {
        return Ok(false);
    }
    for change in response.balance_changes.unwrap_or_default() {
        if change.coin_type != SUI_COIN_TYPE {
            continue;
        }
        let Owner::AddressOwner(address) = &change.owner else {
            continue;
        };
        if !address.eq_ignore_ascii_case(receiver) {
            continue;
        }
        if change
            .amount
            .parse::<i128>()
            .is_ok_and(|amount| amount >= expected_mist)
        {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOON: &str =
        "0x7b888393d6a552819bb0a7f878183abaf04550bfb9546b20ea586d338210826f::moon::MOON";

    #[test]
    fn coin_type_roundtrip() {
        let coin: CoinType = MOON.parse().unwrap();
        assert_eq!(coin.to_string(), MOON);
        assert_eq!(coin.name(), "MOON");
    }

    #[test]
    fn coin_type_package_is_lowercased() {
        let upper = MOON.to_uppercase().replace("0X", "0x");
        let coin: CoinType = upper.parse().unwrap();
        assert!(coin.package().chars().all(|c| !c.is_ascii_uppercase()));
    }

    #[test]
    fn coin_type_rejects_malformed_input() {
        assert!("".parse::<CoinType>().is_err());
        assert!("0x2::sui::SUI".parse::<CoinType>().is_err()); // short form
        assert!("moon::MOON".parse::<CoinType>().is_err());
        assert!(format!("{MOON}::extra").parse::<CoinType>().is_err());
        assert!(MOON.replace("::moon::", "::mo on::")
            .parse::<CoinType>()
            .is_err());
        assert!(MOON.replace('7', "g").parse::<CoinType>().is_err());
    }

    #[test]
    fn shortening_keeps_head_and_four_tail_characters() {
        assert_eq!(shorten_address("0x1234567890abcdef", 6), "0x1234...cdef");
        assert_eq!(shorten_address("0x1234", 6), "0x1234");
    }

    #[test]
    fn coin_type_short_form() {
        let coin: CoinType = MOON.parse().unwrap();
        assert_eq!(coin.short(), "0x7b88...826f::MOON");
    }

    #[test]
    fn digest_shape_check() {
        assert!(looks_like_digest(
            "7qGqXYB7kbhJ6oWZJZcVKyPDkfQU4DHJp9jWBP8rJf3z"
        ));
        assert!(!looks_like_digest("0x1234::moon::MOON"));
        assert!(!looks_like_digest("short"));
    }
}
