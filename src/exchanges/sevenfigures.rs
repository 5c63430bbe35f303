//! Seven Figures proxy client
//!
//! Weekly-only venue: the SF web API serves pre-built 1w OHLCV for KuCoin
//! and MEXC listings. Requesting any other timeframe is a configuration
//! error caught at orchestrator entry; this client just refuses with an
//! empty frame as a second line of defense.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::candles::Frame;
use crate::exchanges::http::{json_f64, ts_from_millis, KlineHttp};
use crate::exchanges::{ExchangeClient, Venue};
use crate::models::{Bar, Timeframe};

const BASE_URL: &str = "https://webapi.sevenfigures.ch/api/DataAnalyses";
const WEEKLY_BARS: usize = 60;
const STABLE_BASES: [&str; 5] = ["USDT", "USDC", "BUSD", "DAI", "TUSD"];

pub struct SfClient {
    venue: Venue,
    /// Exchange name as the SF API spells it ("Kucoin" / "Mexc").
    exchange_name: &'static str,
    http: KlineHttp,
}

#[derive(Debug, Deserialize)]
struct PairInfo {
    #[serde(rename = "Token", default)]
    token: String,
    #[serde(rename = "Quote", default)]
    quote: String,
}

#[derive(Debug, Deserialize)]
struct OhlcvResponse {
    #[serde(rename = "Datas", default)]
    datas: Vec<Value>,
}

impl SfClient {
    pub fn kucoin() -> Self {
        Self {
            venue: Venue::SfKucoin1w,
            exchange_name: "Kucoin",
            http: KlineHttp::new(250),
        }
    }

    pub fn mexc() -> Self {
        Self {
            venue: Venue::SfMexc1w,
            exchange_name: "Mexc",
            http: KlineHttp::new(250),
        }
    }

    /// SF rows are objects keyed either `datetime` (ISO) or `time` (ms).
    fn parse_row(row: &Value) -> Option<Bar> {
        let ts = if let Some(dt) = row.get("datetime").and_then(|v| v.as_str()) {
            chrono::NaiveDateTime::parse_from_str(dt, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(dt, "%Y-%m-%d %H:%M:%S"))
                .ok()?
        } else {
            ts_from_millis(row.get("time")?.as_i64()?)?
        };
        Some(Bar {
            ts,
            open: json_f64(row.get("open")?)?,
            high: json_f64(row.get("high")?)?,
            low: json_f64(row.get("low")?)?,
            close: json_f64(row.get("close")?)?,
            volume: json_f64(row.get("volume")?)?,
        })
    }
}

#[async_trait]
impl ExchangeClient for SfClient {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn list_symbols(&self) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/GetPairsList", BASE_URL);
        let params = [("exchange", self.exchange_name.to_string())];
        let pairs: Vec<PairInfo> = self
            .http
            .get_json(&url, &params)
            .await
            .map_err(anyhow::Error::from)?;

        let mut symbols: Vec<String> = pairs
            .into_iter()
            .filter(|p| {
                p.quote.eq_ignore_ascii_case("USDT")
                    && !p.token.is_empty()
                    && !STABLE_BASES.contains(&p.token.to_uppercase().as_str())
            })
            .map(|p| format!("{}USDT", p.token.to_uppercase()))
            .collect();
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }

    async fn fetch_klines(&self, symbol: &str, timeframe: Timeframe) -> Frame {
        if timeframe != Timeframe::W1 {
            warn!(venue = self.venue.id(), symbol, timeframe = %timeframe, "SF proxy only serves 1w");
            return Frame::default();
        }

        let token = symbol.trim_end_matches("USDT");
        let url = format!("{}/GetPairOHLCVAndSignals", BASE_URL);
        let params = [
            ("token", token.to_string()),
            ("quote", "USDT".to_string()),
            ("exchange", self.exchange_name.to_string()),
            ("timeframe", "1w".to_string()),
            ("quantity", WEEKLY_BARS.to_string()),
        ];

        let response: OhlcvResponse = match self.http.get_json(&url, &params).await {
            Ok(r) => r,
            Err(e) => {
                error!(venue = self.venue.id(), symbol, error = %e, "SF OHLCV request failed");
                return Frame::default();
            }
        };

        Frame::from_bars(response.datas.iter().filter_map(Self::parse_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_row_iso_datetime() {
        let row = serde_json::json!({
            "datetime": "2025-03-17T00:00:00",
            "open": 1.0, "high": 2.0, "low": 0.5, "close": 1.5, "volume": 42.0
        });
        let bar = SfClient::parse_row(&row).unwrap();
        assert_eq!(bar.close, 1.5);
        assert_eq!(bar.ts.format("%Y-%m-%d").to_string(), "2025-03-17");
    }

    #[test]
    fn parse_row_millis_time() {
        let row = serde_json::json!({
            "time": 1_742_169_600_000i64,
            "open": "1.0", "high": "2.0", "low": "0.5", "close": "1.5", "volume": "42.0"
        });
        assert!(SfClient::parse_row(&row).is_some());
    }
}
