//! MEXC kline clients
//!
//! Spot mirrors the Binance v3 shape (ms timestamps, positional arrays,
//! endTime paging). The contract API is a different animal: one object of
//! parallel arrays per response, second timestamps, BTC_USDT symbols.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

use crate::candles::Frame;
use crate::exchanges::http::{json_f64, json_i64, ts_from_millis, ts_from_secs, KlineHttp};
use crate::exchanges::{fetch_target, finalize_frame, ExchangeClient, Venue};
use crate::models::{Bar, Timeframe};

const PAGE_LIMIT: usize = 1000;

pub struct MexcSpotClient {
    base_url: String,
    http: KlineHttp,
}

#[derive(Debug, Deserialize)]
struct SpotExchangeInfo {
    symbols: Vec<SpotSymbol>,
}

#[derive(Debug, Deserialize)]
struct SpotSymbol {
    symbol: String,
    status: String,
}

impl MexcSpotClient {
    pub fn new() -> Self {
        Self {
            base_url: "https://api.mexc.com".to_string(),
            http: KlineHttp::new(200),
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
}

impl Default for MexcSpotClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for MexcSpotClient {
    fn venue(&self) -> Venue {
        Venue::MexcSpot
    }

    async fn list_symbols(&self) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let info: SpotExchangeInfo = self
            .http
            .get_json(&url, &[])
            .await
            .map_err(anyhow::Error::from)?;

        // MEXC reports tradable spot pairs with status "1".
        let mut symbols: Vec<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.symbol.ends_with("USDT") && s.status == "1")
            .map(|s| s.symbol)
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn fetch_klines(&self, symbol: &str, timeframe: Timeframe) -> Frame {
        let url = format!("{}/api/v3/klines", self.base_url);
        let symbol = symbol.replace(['_', '-'], "").to_uppercase();
        let interval = Self::api_interval(timeframe);
        let target = fetch_target(timeframe);
        let mut bars: Vec<Bar> = Vec::with_capacity(target);
        let mut end_time: Option<i64> = None;

        loop {
            let mut params = vec![
                ("symbol", symbol.clone()),
                ("interval", interval.to_string()),
                ("limit", PAGE_LIMIT.min(target).to_string()),
            ];
            if let Some(end) = end_time {
                params.push(("endTime", end.to_string()));
            }

            let rows: Vec<Vec<Value>> = match self.http.get_json(&url, &params).await {
                Ok(r) => r,
                Err(e) => {
                    error!(venue = "mexc_spot", symbol = %symbol, error = %e, "kline request failed");
                    break;
                }
            };
            if rows.is_empty() {
                break;
            }

            let oldest_ms = rows.first().and_then(|r| r.first()).and_then(json_i64);
            let page_len = rows.len();
            bars.extend(rows.iter().filter_map(|r| Self::parse_row(r)));

            if bars.len() >= target || page_len < PAGE_LIMIT.min(target) {
                break;
            }
            match oldest_ms {
                Some(ms) => end_time = Some(ms - 1),
                None => break,
            }
            self.http.pace().await;
        }

        let frame = Frame::from_bars(bars);
        finalize_frame(Venue::MexcSpot, &symbol, timeframe, frame)
    }
}

pub struct MexcFuturesClient {
    base_url: String,
    http: KlineHttp,
}

#[derive(Debug, Deserialize)]
struct ContractResponse<T> {
    success: bool,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ContractDetail {
    symbol: String,
    #[serde(rename = "quoteCoin", default)]
    quote_coin: String,
    #[serde(default)]
    state: i64,
}

/// Parallel arrays, one entry per bar.
#[derive(Debug, Deserialize)]
struct ContractKlines {
    time: Vec<i64>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    vol: Vec<f64>,
}

impl MexcFuturesClient {
    pub fn new() -> Self {
        Self {
            base_url: "https://contract.mexc.com".to_string(),
            http: KlineHttp::new(200),
        }
    }

    fn api_interval(timeframe: Timeframe) -> &'static str {
        if timeframe.is_derived() {
            "Day1"
        } else {
            match timeframe {
                Timeframe::H4 => "Hour4",
                _ => "Day1",
            }
        }
    }

    fn interval_secs(interval: &str) -> i64 {
        match interval {
            "Hour4" => 4 * 3600,
            _ => 86_400,
        }
    }
}

impl Default for MexcFuturesClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for MexcFuturesClient {
    fn venue(&self) -> Venue {
        Venue::MexcFutures
    }

    async fn list_symbols(&self) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/api/v1/contract/detail", self.base_url);
        let response: ContractResponse<Vec<ContractDetail>> = self
            .http
            .get_json(&url, &[])
            .await
            .map_err(anyhow::Error::from)?;

        if !response.success {
            anyhow::bail!("mexc contract detail request unsuccessful");
        }

        let mut symbols: Vec<String> = response
            .data
            .unwrap_or_default()
            .into_iter()
            .filter(|c| c.quote_coin == "USDT" && c.state == 0)
            .map(|c| c.symbol)
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn fetch_klines(&self, symbol: &str, timeframe: Timeframe) -> Frame {
        let interval = Self::api_interval(timeframe);
        let step = Self::interval_secs(interval);
        let target = fetch_target(timeframe);
        let url = format!("{}/api/v1/contract/kline/{}", self.base_url, symbol);

        // One time window sized to the target count; the contract API caps
        // around 2000 rows per call which covers every timeframe here.
        let end = chrono::Utc::now().timestamp();
        let start = end - step * target as i64;
        let params = [
            ("interval", interval.to_string()),
            ("start", start.to_string()),
            ("end", end.to_string()),
        ];

        let response: ContractResponse<ContractKlines> =
            match self.http.get_json(&url, &params).await {
                Ok(r) => r,
                Err(e) => {
                    error!(venue = "mexc_futures", symbol, error = %e, "kline request failed");
                    return Frame::default();
                }
            };

        let data = match response.data {
            Some(d) if response.success => d,
            _ => {
                error!(venue = "mexc_futures", symbol, "kline API error");
                return Frame::default();
            }
        };

        let n = data
            .time
            .len()
            .min(data.open.len())
            .min(data.high.len())
            .min(data.low.len())
            .min(data.close.len())
            .min(data.vol.len());
        let mut bars = Vec::with_capacity(n);
        for i in 0..n {
            if let Some(ts) = ts_from_secs(data.time[i]) {
                bars.push(Bar {
                    ts,
                    open: data.open[i],
                    high: data.high[i],
                    low: data.low[i],
                    close: data.close[i],
                    volume: data.vol[i],
                });
            }
        }

        let frame = Frame::from_bars(bars);
        finalize_frame(Venue::MexcFutures, symbol, timeframe, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_klines_zip_to_bars() {
        let data = ContractKlines {
            time: vec![1_742_428_800, 1_742_515_200],
            open: vec![1.0, 1.2],
            high: vec![1.5, 1.6],
            low: vec![0.9, 1.1],
            close: vec![1.2, 1.4],
            vol: vec![100.0, 200.0],
        };
        assert_eq!(data.time.len(), 2);
        assert!(ts_from_secs(data.time[0]).is_some());
    }

    #[test]
    fn spot_symbol_normalization() {
        assert_eq!("BTC_USDT".replace(['_', '-'], "").to_uppercase(), "BTCUSDT");
    }
}
