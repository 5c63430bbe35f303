//! Gate.io v4 kline client (spot and USDT perpetuals)
//!
//! Spot candlesticks are positional string arrays with second timestamps;
//! futures candlesticks are objects. Both paginate backwards with `to`
//! (seconds). Symbols use the underscore form (BTC_USDT).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

use crate::candles::Frame;
use crate::exchanges::http::{json_f64, json_i64, ts_from_secs, KlineHttp};
use crate::exchanges::{fetch_target, finalize_frame, is_leveraged_base, ExchangeClient, Venue};
use crate::models::{Bar, Timeframe};

const PAGE_LIMIT: usize = 1000;

pub struct GateioClient {
    venue: Venue,
    base_url: String,
    http: KlineHttp,
}

#[derive(Debug, Deserialize)]
struct CurrencyPair {
    id: String,
    #[serde(default)]
    base: String,
    #[serde(default)]
    quote: String,
    #[serde(default)]
    trade_status: String,
}

#[derive(Debug, Deserialize)]
struct Contract {
    name: String,
    #[serde(default)]
    in_delisting: bool,
}

#[derive(Debug, Deserialize)]
struct FuturesCandle {
    t: i64,
    #[serde(default)]
    v: f64,
    c: String,
    h: String,
    l: String,
    o: String,
}

impl GateioClient {
    pub fn spot() -> Self {
        Self {
            venue: Venue::GateioSpot,
            base_url: "https://api.gateio.ws/api/v4".to_string(),
            http: KlineHttp::new(150),
        }
    }

    pub fn futures() -> Self {
        Self {
            venue: Venue::GateioFutures,
            base_url: "https://api.gateio.ws/api/v4".to_string(),
            http: KlineHttp::new(150),
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

    /// Spot row: [ts, quote_volume, close, high, low, open, base_volume, _].
    /// Base volume (index 6) feeds the frame; the quote figure at index 1
    /// is ignored so the USD gate stays `volume × close` everywhere.
    fn parse_spot_row(row: &[Value]) -> Option<Bar> {
        Some(Bar {
            ts: ts_from_secs(json_i64(row.first()?)?)?,
            open: json_f64(row.get(5)?)?,
            high: json_f64(row.get(3)?)?,
            low: json_f64(row.get(4)?)?,
            close: json_f64(row.get(2)?)?,
            volume: json_f64(row.get(6).or_else(|| row.get(1))?)?,
        })
    }

    async fn fetch_spot(&self, symbol: &str, timeframe: Timeframe) -> Vec<Bar> {
        let url = format!("{}/spot/candlesticks", self.base_url);
        let interval = Self::api_interval(timeframe);
        let target = fetch_target(timeframe);
        let mut bars: Vec<Bar> = Vec::with_capacity(target);
        let mut to: Option<i64> = None;

        loop {
            let mut params = vec![
                ("currency_pair", symbol.to_string()),
                ("interval", interval.to_string()),
                ("limit", PAGE_LIMIT.min(target).to_string()),
            ];
            if let Some(t) = to {
                params.push(("to", t.to_string()));
            }

            let rows: Vec<Vec<Value>> = match self.http.get_json(&url, &params).await {
                Ok(r) => r,
                Err(e) => {
                    error!(venue = self.venue.id(), symbol, error = %e, "kline request failed");
                    break;
                }
            };
            if rows.is_empty() {
                break;
            }

            // Ascending: the oldest row of this page is first.
            let oldest_s = rows.first().and_then(|r| r.first()).and_then(json_i64);
            let page_len = rows.len();
            bars.extend(rows.iter().filter_map(|r| Self::parse_spot_row(r)));

            if bars.len() >= target || page_len < PAGE_LIMIT.min(target) {
                break;
            }
            match oldest_s {
                Some(s) => to = Some(s - 1),
                None => break,
            }
            self.http.pace().await;
        }
        bars
    }

    async fn fetch_futures(&self, symbol: &str, timeframe: Timeframe) -> Vec<Bar> {
        let url = format!("{}/futures/usdt/candlesticks", self.base_url);
        let interval = Self::api_interval(timeframe);
        let target = fetch_target(timeframe);
        let mut bars: Vec<Bar> = Vec::with_capacity(target);
        let mut to: Option<i64> = None;

        loop {
            let mut params = vec![
                ("contract", symbol.to_string()),
                ("interval", interval.to_string()),
                ("limit", PAGE_LIMIT.min(target).to_string()),
            ];
            if let Some(t) = to {
                params.push(("to", t.to_string()));
            }

            let rows: Vec<FuturesCandle> = match self.http.get_json(&url, &params).await {
                Ok(r) => r,
                Err(e) => {
                    error!(venue = self.venue.id(), symbol, error = %e, "kline request failed");
                    break;
                }
            };
            if rows.is_empty() {
                break;
            }

            let oldest_s = rows.first().map(|r| r.t);
            let page_len = rows.len();
            for row in &rows {
                let bar = (|| {
                    Some(Bar {
                        ts: ts_from_secs(row.t)?,
                        open: row.o.parse().ok()?,
                        high: row.h.parse().ok()?,
                        low: row.l.parse().ok()?,
                        close: row.c.parse().ok()?,
                        volume: row.v,
                    })
                })();
                if let Some(bar) = bar {
                    bars.push(bar);
                }
            }

            if bars.len() >= target || page_len < PAGE_LIMIT.min(target) {
                break;
            }
            match oldest_s {
                Some(s) => to = Some(s - 1),
                None => break,
            }
            self.http.pace().await;
        }
        bars
    }
}

#[async_trait]
impl ExchangeClient for GateioClient {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn list_symbols(&self) -> anyhow::Result<Vec<String>> {
        if self.venue.is_futures() {
            let url = format!("{}/futures/usdt/contracts", self.base_url);
            let contracts: Vec<Contract> = self
                .http
                .get_json(&url, &[])
                .await
                .map_err(anyhow::Error::from)?;
            let mut symbols: Vec<String> = contracts
                .into_iter()
                .filter(|c| c.name.ends_with("_USDT") && !c.in_delisting)
                .map(|c| c.name)
                .collect();
            symbols.sort();
            Ok(symbols)
        } else {
            let url = format!("{}/spot/currency_pairs", self.base_url);
            let pairs: Vec<CurrencyPair> = self
                .http
                .get_json(&url, &[])
                .await
                .map_err(anyhow::Error::from)?;
            let mut symbols: Vec<String> = pairs
                .into_iter()
                .filter(|p| {
                    p.quote == "USDT" && p.trade_status == "tradable" && !is_leveraged_base(&p.base)
                })
                .map(|p| p.id)
                .collect();
            symbols.sort();
            Ok(symbols)
        }
    }

    async fn fetch_klines(&self, symbol: &str, timeframe: Timeframe) -> Frame {
        let bars = if self.venue.is_futures() {
            self.fetch_futures(symbol, timeframe).await
        } else {
            self.fetch_spot(symbol, timeframe).await
        };
        let frame = Frame::from_bars(bars);
        finalize_frame(self.venue, symbol, timeframe, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_spot_row_uses_base_volume() {
        let row: Vec<Value> = serde_json::from_str(
            r#"["1742428800","104000.0","1.20","1.30","1.00","1.10","95000.0","true"]"#,
        )
        .unwrap();
        let bar = GateioClient::parse_spot_row(&row).unwrap();
        assert_eq!(bar.open, 1.10);
        assert_eq!(bar.high, 1.30);
        assert_eq!(bar.low, 1.00);
        assert_eq!(bar.close, 1.20);
        assert_eq!(bar.volume, 95000.0);
    }
}
