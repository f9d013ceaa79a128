use cached::proc_macro::cached;
use serde::Deserialize;

use super::requests::get_reqwest_client;
use super::sui::{CoinType, SUI_COIN_TYPE, SUI_DECIMALS};

fn api_base() -> String {
    std::env::var("MARKET_API_URL")
        .unwrap_or_else(|_| "https://public-api.birdeye.so/public".to_string())
}

fn api_key() -> Option<String> {
    std::env::var("BIRDEYE_API_KEY").ok()
}

/// Market snapshot of a token, fetched fresh (with a short cache) on every
/// use. The zeroed default is the degraded-mode value when the API is down.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "value", default)]
    pub price: f64,
    #[serde(rename = "marketCap", default)]
    pub market_cap: f64,
    #[serde(default)]
    pub liquidity: f64,
    #[serde(rename = "change30m", default)]
    pub price_change_30m: f64,
    #[serde(rename = "change24h", default)]
    pub price_change_24h: f64,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

fn default_symbol() -> String {
    "TOKEN".to_string()
}

fn default_decimals() -> u32 {
    SUI_DECIMALS
}

impl Default for TokenInfo {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            name: String::new(),
            price: 0.0,
            market_cap: 0.0,
            liquidity: 0.0,
            price_change_30m: 0.0,
            price_change_24h: 0.0,
            decimals: default_decimals(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MarketResponse<T> {
    data: Option<T>,
}

async fn market_get<T: serde::de::DeserializeOwned>(
    path: &str,
    query: &[(&str, String)],
) -> Result<T, anyhow::Error> {
    let mut request = get_reqwest_client()
        .get(format!("{}{path}", api_base()))
        .query(query);
    if let Some(key) = api_key() {
        request = request.header("X-API-KEY", key);
    }
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(anyhow::anyhow!(
            "Market API error {}: {}",
            response.status(),
            response.text().await.unwrap_or_default()
        ));
    }
    let response: MarketResponse<T> = response.json().await?;
    response
        .data
        .ok_or_else(|| anyhow::anyhow!("Market API returned no data"))
}

#[cached(time = 30, result = true, size = 1000)]
async fn _fetch_token_info_cached_30s(coin: String) -> Result<TokenInfo, anyhow::Error> {
    market_get(
        "/token/price",
        &[("address", coin), ("chain", "sui".to_string())],
    )
    .await
}

pub async fn fetch_token_info(coin: &CoinType) -> Result<TokenInfo, anyhow::Error> {
    _fetch_token_info_cached_30s(coin.to_string()).await
}

pub async fn fetch_sui_price() -> Result<f64, anyhow::Error> {
    Ok(_fetch_token_info_cached_30s(SUI_COIN_TYPE.to_string())
        .await?
        .price)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeItem {
    #[serde(rename = "txHash", default)]
    pub tx_hash: String,
    #[serde(rename = "source", alias = "owner", default)]
    pub buyer: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(rename = "valueUsd", default)]
    pub value_usd: f64,
    #[serde(default)]
    pub timestamp: u64,
}

/// Buy-side trades of `coin` newer than `since` (unix seconds).
pub async fn fetch_recent_trades(
    coin: &CoinType,
    since: u64,
) -> Result<Vec<TradeItem>, anyhow::Error> {
    let trades: Vec<TradeItem> = market_get(
        "/token/trades",
        &[
            ("address", coin.to_string()),
            ("chain", "sui".to_string()),
            ("type", "buy".to_string()),
            ("limit", "50".to_string()),
        ],
    )
    .await?;
    Ok(trades
        .into_iter()
        .filter(|trade| trade.timestamp > since)
        .collect())
}

/// `$1,234.56` with thousands separators.
pub fn format_usd(amount: f64) -> String {
    let formatted = format!("{:.2}", amount.abs());
    let (int_part, dec_part) = formatted.split_once('.').unwrap_or((&formatted, "00"));
    let mut result = String::new();
    for (count, digit) in int_part.chars().rev().enumerate() {
        if count != 0 && count % 3 == 0 {
            result.insert(0, ',');
        }
        result.insert(0, digit);
    }
    format!(
        "{}${result}.{dec_part}",
        if amount < 0.0 { "-" } else { "" }
    )
}

/// `$1.23M` / `$456.78K`, for market cap and liquidity.
pub fn format_usd_compact(amount: f64) -> String {
    let abs = amount.abs();
    if abs >= 1_000_000_000.0 {
        format!("${:.2}B", amount / 1e9)
    } else if abs >= 1_000_000.0 {
        format!("${:.2}M", amount / 1e6)
    } else if abs >= 1_000.0 {
        format!("${:.2}K", amount / 1e3)
    } else {
        format!("${amount:.2}")
    }
}

/// Token prices are often far below one cent, so the precision scales with
/// the magnitude.
pub fn format_price(price: f64) -> String {
    if price >= 1.0 {
        format!("${price:.2}")
    } else if price >= 0.01 {
        format!("${price:.4}")
    } else {
        format!("${price:.8}")
    }
}

pub fn format_percent_change(change: f64) -> String {
    if change >= 0.0 {
        format!("+{change:.2}%")
    } else {
        format!("{change:.2}%")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_thousands_separators() {
        assert_eq!(format_usd(0.0), "$0.00");
        assert_eq!(format_usd(1234.5), "$1,234.50");
        assert_eq!(format_usd(987654321.129), "$987,654,321.13");
        assert_eq!(format_usd(-42.0), "-$42.00");
    }

    #[test]
    fn compact_suffixes() {
        assert_eq!(format_usd_compact(12.3), "$12.30");
        assert_eq!(format_usd_compact(123_450.0), "$123.45K");
        assert_eq!(format_usd_compact(1_234_000.0), "$1.23M");
        assert_eq!(format_usd_compact(2_500_000_000.0), "$2.50B");
    }

    #[test]
    fn price_precision_scales_down() {
        assert_eq!(format_price(1.5), "$1.50");
        assert_eq!(format_price(0.0321), "$0.0321");
        assert_eq!(format_price(0.00001234), "$0.00001234");
    }

    #[test]
    fn percent_change_sign() {
        assert_eq!(format_percent_change(3.456), "+3.46%");
        assert_eq!(format_percent_change(-12.3), "-12.30%");
    }
}
