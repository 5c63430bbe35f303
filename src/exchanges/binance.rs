//! Binance spot & USDT-perpetual kline client
//!
//! Klines come back as positional arrays with ms timestamps, ascending.
//! Error payloads are 200 responses carrying `{"code": …}`; -1121 means the
//! symbol does not exist, -1003 is the rate-limit code.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::candles::Frame;
use crate::exchanges::http::{json_f64, json_i64, ts_from_millis, KlineHttp};
use crate::exchanges::{fetch_target, finalize_frame, ExchangeClient, Venue};
use crate::models::{Bar, Timeframe};

const PAGE_LIMIT: usize = 1000;
const RATE_LIMIT_CODE: i64 = -1003;
const INVALID_SYMBOL_CODE: i64 = -1121;

pub struct BinanceClient {
    venue: Venue,
    base_url: String,
    http: KlineHttp,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    status: String,
    #[serde(rename = "contractType")]
    contract_type: Option<String>,
}

impl BinanceClient {
    pub fn spot() -> Self {
        Self {
            venue: Venue::BinanceSpot,
            base_url: "https://api.binance.com".to_string(),
            http: KlineHttp::new(100),
        }
    }

    pub fn futures() -> Self {
        Self {
            venue: Venue::BinanceFutures,
            base_url: "https://fapi.binance.com".to_string(),
            http: KlineHttp::new(100),
        }
    }

    fn kline_url(&self) -> String {
        match self.venue {
            Venue::BinanceFutures => format!("{}/fapi/v1/klines", self.base_url),
            _ => format!("{}/api/v3/klines", self.base_url),
        }
    }

    fn exchange_info_url(&self) -> String {
        match self.venue {
            Venue::BinanceFutures => format!("{}/fapi/v1/exchangeInfo", self.base_url),
            _ => format!("{}/api/v3/exchangeInfo", self.base_url),
        }
    }

    fn api_interval(timeframe: Timeframe) -> &'static str {
        if timeframe.is_derived() {
            "1d"
        } else {
            match timeframe {
                Timeframe::H4 => "4h",
                _ => "1d",
            }
        }
    }

    /// Parse one kline row:
    /// [open_time, open, high, low, close, volume, close_time, quote_volume, …].
    /// `quote_asset_volume` (index 7) is deliberately unused: the USD gate
    /// prices base volume at the close on every venue.
    fn parse_row(row: &[Value]) -> Option<Bar> {
        Some(Bar {
            ts: ts_from_millis(json_i64(row.first()?)?)?,
            open: json_f64(row.get(1)?)?,
            high: json_f64(row.get(2)?)?,
            low: json_f64(row.get(3)?)?,
            close: json_f64(row.get(4)?)?,
            volume: json_f64(row.get(5)?)?,
        })
    }

    async fn fetch_rows(&self, symbol: &str, timeframe: Timeframe) -> Vec<Bar> {
        let interval = Self::api_interval(timeframe);
        let target = fetch_target(timeframe);
        let mut bars: Vec<Bar> = Vec::with_capacity(target);
        let mut end_time: Option<i64> = None;

        loop {
            let mut params = vec![
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("limit", PAGE_LIMIT.min(target).to_string()),
            ];
            if let Some(end) = end_time {
                params.push(("endTime", end.to_string()));
            }

            let payload: Value = match self.http.get_json(&self.kline_url(), &params).await {
                Ok(v) => v,
                Err(e) => {
                    error!(venue = self.venue.id(), symbol, error = %e, "kline request failed");
                    return bars;
                }
            };

            let rows = match &payload {
                Value::Array(rows) => rows,
                Value::Object(obj) => {
                    match obj.get("code").and_then(|c| c.as_i64()) {
                        Some(INVALID_SYMBOL_CODE) => {
                            warn!(venue = self.venue.id(), symbol, "invalid symbol")
                        }
                        Some(RATE_LIMIT_CODE) => {
                            warn!(venue = self.venue.id(), symbol, "rate limit code in payload")
                        }
                        _ => error!(venue = self.venue.id(), symbol, payload = %payload, "unexpected kline payload"),
                    }
                    return bars;
                }
                _ => {
                    error!(venue = self.venue.id(), symbol, "unexpected kline payload shape");
                    return bars;
                }
            };

            if rows.is_empty() {
                break;
            }

            let mut page: Vec<Bar> = rows
                .iter()
                .filter_map(|r| r.as_array().and_then(|a| Self::parse_row(a)))
                .collect();
            let oldest_open_ms = rows
                .first()
                .and_then(|r| r.as_array())
                .and_then(|a| a.first())
                .and_then(json_i64);
            let page_len = page.len();
            bars.append(&mut page);

            if bars.len() >= target || page_len < PAGE_LIMIT.min(target) {
                break;
            }
            match oldest_open_ms {
                Some(ms) => end_time = Some(ms - 1),
                None => break,
            }
            self.http.pace().await;
        }

        bars
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn list_symbols(&self) -> anyhow::Result<Vec<String>> {
        let info: ExchangeInfo = self
            .http
            .get_json(&self.exchange_info_url(), &[])
            .await
            .map_err(anyhow::Error::from)?;

        let is_futures = self.venue.is_futures();
        let mut symbols: Vec<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.symbol.ends_with("USDT") && s.status == "TRADING")
            .filter(|s| {
                !is_futures || s.contract_type.as_deref() == Some("PERPETUAL")
            })
            .map(|s| s.symbol)
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn fetch_klines(&self, symbol: &str, timeframe: Timeframe) -> Frame {
        let bars = self.fetch_rows(symbol, timeframe).await;
        let frame = Frame::from_bars(bars);
        finalize_frame(self.venue, symbol, timeframe, frame)
    }
}
