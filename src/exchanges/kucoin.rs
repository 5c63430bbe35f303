//! KuCoin spot kline client
//!
//! /api/v1/market/candles serves at most 1500 rows and ignores `limit`, so
//! pagination is pure time-windowing with startAt/endAt in seconds. Rows
//! come newest-first as string arrays [time, open, close, high, low,
//! volume, turnover]. Symbols are dash-separated (BTC-USDT) and leveraged
//! tokens are filtered out of the listing by base suffix.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

use crate::candles::Frame;
use crate::exchanges::http::{json_f64, json_i64, ts_from_secs, KlineHttp};
use crate::exchanges::{fetch_target, finalize_frame, is_leveraged_base, ExchangeClient, Venue};
use crate::models::{Bar, Timeframe};

const PAGE_ROWS: i64 = 1500;
const OK_CODE: &str = "200000";

pub struct KucoinClient {
    base_url: String,
    http: KlineHttp,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(rename = "quoteCurrency", default)]
    quote_currency: String,
    #[serde(rename = "enableTrading", default)]
    enable_trading: bool,
}

impl KucoinClient {
    pub fn new() -> Self {
        Self {
            base_url: "https://api.kucoin.com".to_string(),
            http: KlineHttp::new(200),
        }
    }

    fn api_interval(timeframe: Timeframe) -> &'static str {
        if timeframe.is_derived() {
            "1day"
        } else {
            match timeframe {
                Timeframe::H4 => "4hour",
                _ => "1day",
            }
        }
    }

    fn interval_secs(interval: &str) -> i64 {
        match interval {
            "4hour" => 4 * 3600,
            _ => 86_400,
        }
    }

    /// [time, open, close, high, low, volume, turnover] — turnover is the
    /// quote figure and stays unused for the USD gate.
    fn parse_row(row: &[Value]) -> Option<Bar> {
        Some(Bar {
            ts: ts_from_secs(json_i64(row.first()?)?)?,
            open: json_f64(row.get(1)?)?,
            close: json_f64(row.get(2)?)?,
            high: json_f64(row.get(3)?)?,
            low: json_f64(row.get(4)?)?,
            volume: json_f64(row.get(5)?)?,
        })
    }
}

impl Default for KucoinClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for KucoinClient {
    fn venue(&self) -> Venue {
        Venue::KucoinSpot
    }

    async fn list_symbols(&self) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/api/v1/symbols", self.base_url);
        let response: ApiResponse<Vec<SymbolInfo>> = self
            .http
            .get_json(&url, &[])
            .await
            .map_err(anyhow::Error::from)?;

        if response.code != OK_CODE {
            anyhow::bail!(
                "kucoin symbols error {}: {}",
                response.code,
                response.msg.unwrap_or_default()
            );
        }

        let mut symbols: Vec<String> = response
            .data
            .unwrap_or_default()
            .into_iter()
            .filter(|s| {
                s.quote_currency == "USDT"
                    && s.enable_trading
                    && !is_leveraged_base(s.symbol.split('-').next().unwrap_or(""))
            })
            .map(|s| s.symbol)
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn fetch_klines(&self, symbol: &str, timeframe: Timeframe) -> Frame {
        let url = format!("{}/api/v1/market/candles", self.base_url);
        let symbol = symbol.replace('_', "-").to_uppercase();
        let interval = Self::api_interval(timeframe);
        let step = Self::interval_secs(interval);
        let window = PAGE_ROWS * step;
        let target = fetch_target(timeframe);

        let mut bars: Vec<Bar> = Vec::with_capacity(target);
        let mut end_at = chrono::Utc::now().timestamp();

        while bars.len() < target {
            let start_at = (end_at - window + step).max(0);
            let params = [
                ("symbol", symbol.clone()),
                ("type", interval.to_string()),
                ("startAt", start_at.to_string()),
                ("endAt", end_at.to_string()),
            ];

            let response: ApiResponse<Vec<Vec<Value>>> =
                match self.http.get_json(&url, &params).await {
                    Ok(r) => r,
                    Err(e) => {
                        error!(venue = "kucoin_spot", symbol = %symbol, error = %e, "kline request failed");
                        break;
                    }
                };

            if response.code != OK_CODE {
                error!(
                    venue = "kucoin_spot",
                    symbol = %symbol,
                    code = %response.code,
                    msg = response.msg.as_deref().unwrap_or(""),
                    "kline API error"
                );
                break;
            }

            let rows = response.data.unwrap_or_default();
            if rows.is_empty() {
                break;
            }

            // Newest first: the last row of the batch is the oldest.
            let oldest_s = rows.last().and_then(|r| r.first()).and_then(json_i64);
            bars.extend(rows.iter().filter_map(|r| Self::parse_row(r)));

            match oldest_s {
                Some(s) => end_at = s - 1,
                None => break,
            }
            self.http.pace().await;
        }

        let frame = Frame::from_bars(bars);
        finalize_frame(Venue::KucoinSpot, &symbol, timeframe, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_row_has_open_close_swapped_columns() {
        // KuCoin order is time/open/close/high/low/volume.
        let row: Vec<Value> = serde_json::from_str(
            r#"["1742428800","1.10","1.20","1.30","1.00","5000.0","5600.0"]"#,
        )
        .unwrap();
        let bar = KucoinClient::parse_row(&row).unwrap();
        assert_eq!(bar.open, 1.10);
        assert_eq!(bar.close, 1.20);
        assert_eq!(bar.high, 1.30);
        assert_eq!(bar.low, 1.00);
        assert_eq!(bar.volume, 5000.0);
    }
}
