//! Bybit v5 kline client (spot and linear perpetuals)
//!
//! Same endpoint for both markets, switched by `category`. Rows arrive
//! newest-first and are reversed during normalization; pagination walks
//! backwards with the `end` cursor in milliseconds.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

use crate::candles::Frame;
use crate::exchanges::http::{json_f64, json_i64, ts_from_millis, KlineHttp};
use crate::exchanges::{fetch_target, finalize_frame, ExchangeClient, Venue};
use crate::models::{Bar, Timeframe};

const PAGE_LIMIT: usize = 1000;

pub struct BybitClient {
    venue: Venue,
    base_url: String,
    http: KlineHttp,
}

#[derive(Debug, Deserialize)]
struct V5Response<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    list: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResult {
    list: Vec<Instrument>,
}

#[derive(Debug, Deserialize)]
struct Instrument {
    symbol: String,
    status: String,
    #[serde(rename = "quoteCoin")]
    quote_coin: String,
}

impl BybitClient {
    pub fn spot() -> Self {
        Self {
            venue: Venue::BybitSpot,
            base_url: "https://api.bybit.com".to_string(),
            http: KlineHttp::new(100),
        }
    }

    pub fn futures() -> Self {
        Self {
            venue: Venue::BybitFutures,
            base_url: "https://api.bybit.com".to_string(),
            http: KlineHttp::new(100),
        }
    }

    fn category(&self) -> &'static str {
        if self.venue.is_futures() {
            "linear"
        } else {
            "spot"
        }
    }

    fn api_interval(timeframe: Timeframe) -> &'static str {
        if timeframe.is_derived() {
            "D"
        } else {
            match timeframe {
                Timeframe::H4 => "240",
                _ => "D",
            }
        }
    }

    /// Row: [startTime, open, high, low, close, volume, turnover]; turnover
    /// is the quote-side figure and is not used for the USD gate.
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

#[async_trait]
impl ExchangeClient for BybitClient {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn list_symbols(&self) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/v5/market/instruments-info", self.base_url);
        let params = [
            ("category", self.category().to_string()),
            ("limit", "1000".to_string()),
        ];
        let response: V5Response<InstrumentsResult> = self
            .http
            .get_json(&url, &params)
            .await
            .map_err(anyhow::Error::from)?;

        if response.ret_code != 0 {
            anyhow::bail!("bybit instruments error {}: {}", response.ret_code, response.ret_msg);
        }

        let mut symbols: Vec<String> = response
            .result
            .map(|r| r.list)
            .unwrap_or_default()
            .into_iter()
            .filter(|i| i.quote_coin == "USDT" && i.status == "Trading")
            .map(|i| i.symbol)
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn fetch_klines(&self, symbol: &str, timeframe: Timeframe) -> Frame {
        let url = format!("{}/v5/market/kline", self.base_url);
        let interval = Self::api_interval(timeframe);
        let target = fetch_target(timeframe);
        let mut bars: Vec<Bar> = Vec::with_capacity(target);
        let mut end_time: Option<i64> = None;

        loop {
            let mut params = vec![
                ("category", self.category().to_string()),
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("limit", PAGE_LIMIT.min(target).to_string()),
            ];
            if let Some(end) = end_time {
                params.push(("end", end.to_string()));
            }

            let response: V5Response<KlineResult> = match self.http.get_json(&url, &params).await {
                Ok(r) => r,
                Err(e) => {
                    error!(venue = self.venue.id(), symbol, error = %e, "kline request failed");
                    break;
                }
            };

            if response.ret_code != 0 {
                error!(
                    venue = self.venue.id(),
                    symbol,
                    code = response.ret_code,
                    msg = %response.ret_msg,
                    "kline API error"
                );
                break;
            }

            let rows = response.result.map(|r| r.list).unwrap_or_default();
            if rows.is_empty() {
                break;
            }

            // Newest first: the oldest row of this page is the last one.
            let oldest_ms = rows.last().and_then(|r| r.first()).and_then(json_i64);
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
        finalize_frame(self.venue, symbol, timeframe, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_row_strings() {
        let row: Vec<Value> =
            serde_json::from_str(r#"["1742428800000","1.1","1.3","1.0","1.2","1000.5","1150.0"]"#)
                .unwrap();
        let bar = BybitClient::parse_row(&row).unwrap();
        assert_eq!(bar.close, 1.2);
        assert_eq!(bar.volume, 1000.5);
    }

    #[test]
    fn intervals() {
        assert_eq!(BybitClient::api_interval(Timeframe::H4), "240");
        assert_eq!(BybitClient::api_interval(Timeframe::D1), "D");
        assert_eq!(BybitClient::api_interval(Timeframe::W1), "D");
    }
}
