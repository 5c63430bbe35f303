//! Per-strategy message blocks
//!
//! HTML with the close linked to a TradingView chart. Each strategy family
//! keeps its own layout; strength wording is always Strong/Regular.

use crate::detectors::{composed::HbsContext, Payload, Strategy};
use crate::models::{StrengthLabel, Timeframe};
use crate::scanner::SignalRow;

fn format_volume(volume_usd: f64) -> String {
    if volume_usd >= 1_000_000.0 {
        format!("${:.1}M", volume_usd / 1_000_000.0)
    } else {
        format!("${volume_usd:.0}")
    }
}

fn bar_status(row: &SignalRow) -> &'static str {
    if row.current_bar {
        "CURRENT BAR"
    } else {
        "Last Closed Bar"
    }
}

fn volume_period(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::W1 => "Weekly",
        Timeframe::D4 => "4-Day",
        Timeframe::D3 => "3-Day",
        Timeframe::D2 => "2-Day",
        Timeframe::D1 => "Daily",
        Timeframe::H4 => "4-Hour",
    }
}

fn direction_display(direction: &str) -> &'static str {
    match direction {
        "Up" => "🟢⬆️ UP",
        "Down" => "🔴⬇️ DOWN",
        _ => "⚪ NEUTRAL",
    }
}

fn strength_display(label: StrengthLabel) -> &'static str {
    match label {
        StrengthLabel::Strong => "💪 STRONG",
        StrengthLabel::Regular => "😔 REGULAR",
    }
}

fn date_display(row: &SignalRow) -> String {
    row.bar_ts.format("%Y-%m-%d").to_string()
}

fn linked_headline(row: &SignalRow) -> String {
    format!(
        "<a href='{}'>{}</a> | ${:.2} | Vol: {}\nTime: {} | {}\n----\n",
        row.tradingview_link(),
        row.symbol,
        row.close,
        format_volume(row.volume_usd),
        date_display(row),
        bar_status(row)
    )
}

/// One signal's block inside a strategy batch message. The payload picks
/// the layout; the strategy only matters for the handful of families that
/// share a payload shape.
pub fn signal_block(_strategy: Strategy, row: &SignalRow) -> String {
    let separator = "=".repeat(30);
    match &row.payload {
        Payload::Vsa(p) => format!(
            "Symbol: {}\nTime: {} - {}\nClose: <a href='{}'>${:.8}</a>\n\
             Volume Ratio: {:.2}x\n{} Volume: ${:.2}\nClose Off Low: {:.1}%\n\
             Angular Ratio: {:.2}\n{}\n",
            row.symbol,
            date_display(row),
            bar_status(row),
            row.tradingview_link(),
            row.close,
            row.volume_ratio,
            volume_period(row.timeframe),
            row.volume_usd,
            row.close_off_low,
            p.arctan_ratio,
            separator
        ),
        Payload::HbsBreakout(p) => {
            let context_display = match p.breakout_type {
                HbsContext::Both => "📈 Both",
                HbsContext::ChannelBreakout => "␥ Channel BO",
                HbsContext::ConsolidationBreakout => "☲ Consolidation BO",
            };
            let extreme_display = match (p.extreme_volume, p.extreme_spread) {
                (true, true) => "🟠 Volume and Spread",
                (true, false) => "🟠 Volume",
                (false, true) => "🟠 Spread",
                (false, false) => "🟢 None",
            };

            let mut message = linked_headline(row);
            message.push_str(&format!(
                "Close Position: {} ({:.1}%)\nContext: {}\n",
                row.close_position_indicator, row.close_position_pct, context_display
            ));
            if p.breakout_type == HbsContext::ConsolidationBreakout {
                if let Some(label) = p.strength_label {
                    message.push_str(&format!("Strength: {}\n", strength_display(label)));
                }
            }
            message.push_str(&format!(
                "Is extreme: {}\nDirection: {}\n",
                extreme_display,
                direction_display(p.direction.as_str())
            ));

            let mut components = Vec::new();
            if p.has_sma50_breakout {
                let mut line = match p.sma50_breakout_type {
                    Some(t) if t.as_str() == "pre_breakout" => "✅ 50SMA: Pre-Breakout".to_string(),
                    Some(_) => "✅ 50SMA: Regular".to_string(),
                    None => "✅ 50SMA".to_string(),
                };
                if let Some(label) = p.sma50_strength {
                    line.push_str(&format!(" ({})", label.as_str()));
                }
                components.push(line);
            }
            if p.has_engulfing_reversal {
                components.push(format!("✅ Engulfing Reversal: {}", p.confluence_direction));
            }
            if p.has_volume_breakout {
                components.push("✅ Volume breakout".to_string());
            }
            if !components.is_empty() {
                message.push_str("----\n");
                for component in components {
                    message.push_str(&component);
                    message.push('\n');
                }
            }
            message.push_str(&separator);
            message.push('\n');
            message
        }
        Payload::VsWakeup(p) => format!(
            "{}Close Position: {} ({:.1}%)\nBox age: {} bars\n{}\n",
            linked_headline(row),
            row.close_position_indicator,
            row.close_position_pct,
            p.box_age,
            separator
        ),
        Payload::ConsolidationBreakout(p) => format!(
            "{}Close Position: {} ({:.1}%)\nDirection: {}\nStrength: {}\nType: {}\n\
             Box Age: {} bars\nChannel Ratio: {:.2}\n{}\n",
            linked_headline(row),
            row.close_position_indicator,
            row.close_position_pct,
            direction_display(p.direction.as_str()),
            strength_display(p.strength_label),
            p.breakout_kind.replace('_', " "),
            p.box_age,
            p.channel_ratio,
            separator
        ),
        Payload::Sma50Breakout(p) => {
            let type_display = match p.breakout_type.as_str() {
                "regular" => "Regular",
                _ => "Pre-Breakout",
            };
            let strength = p
                .strength
                .map(strength_display)
                .unwrap_or("—");
            format!(
                "{}Type: {}\nStrength: {}\nClose Position: {} ({:.1}%)\n{}\n",
                linked_headline(row),
                type_display,
                strength,
                row.close_position_indicator,
                row.close_position_pct,
                separator
            )
        }
        Payload::BullishEngulfing(p) => format!(
            "{}Close Position: {:.2}\nVolume Ratio: {:.2}x\nPR Low 21: {:.1}%\n\
             PR HL2 13: {:.1}%\nPR Spread 21: {:.1}%\nBuying Power: {}\n{}\n",
            linked_headline(row),
            p.close_position,
            p.volume_ratio,
            p.pr_low_21,
            p.pr_hl2_13,
            p.pr_spread_21,
            if p.is_buying_power { "✓" } else { "✗" },
            separator
        ),
        Payload::VolumeSurge(p) => format!(
            "{}Volume Ratio: {:.2}x\nScore: {:.2}\nPrice Extreme: {}\n{}\n",
            linked_headline(row),
            p.volume_ratio,
            p.score,
            p.price_extreme,
            separator
        ),
        Payload::Confluence(p) => format!(
            "{}Direction: {}\nClose Off Low: {:.1}%\nMomentum Score: {:.3}\n\
             Engulfing Reversal: {}\n{}\n",
            linked_headline(row),
            p.direction,
            p.close_off_low,
            p.momentum_score,
            if p.is_engulfing_reversal { "✓" } else { "✗" },
            separator
        ),
        _ => format!(
            "Symbol: {}\nTime: {} - {}\nClose: <a href='{}'>${:.8}</a>\n{}\n",
            row.symbol,
            date_display(row),
            bar_status(row),
            row.tradingview_link(),
            row.close,
            separator
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::vsa::VsaPayload;
    use crate::exchanges::Venue;
    use chrono::NaiveDate;

    fn row(payload: Payload) -> SignalRow {
        SignalRow {
            symbol: "BTCUSDT".to_string(),
            exchange: Venue::BinanceSpot,
            timeframe: Timeframe::D1,
            bar_ts: NaiveDate::from_ymd_opt(2025, 3, 20)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            current_bar: false,
            close: 84_000.0,
            volume_usd: 2_400_000.0,
            volume_ratio: 3.1,
            close_off_low: 82.0,
            close_position_indicator: "○○●".to_string(),
            close_position_pct: 82.0,
            payload,
        }
    }

    #[test]
    fn vsa_block_carries_link_and_ratio() {
        let block = signal_block(
            Strategy::BreakoutBar,
            &row(Payload::Vsa(VsaPayload { arctan_ratio: 1.25 })),
        );
        assert!(block.contains("tradingview.com"));
        assert!(block.contains("Angular Ratio: 1.25"));
        assert!(block.contains("Daily Volume"));
        assert!(block.contains("Last Closed Bar"));
    }

    #[test]
    fn volume_formatting() {
        assert_eq!(format_volume(2_400_000.0), "$2.4M");
        assert_eq!(format_volume(84_000.0), "$84000");
    }
}
