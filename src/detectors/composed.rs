//! Composed strategies
//!
//! HBS breakout and VS wakeup reuse the primitive detectors on the same
//! frame — no refetching, no duplicated condition logic. HBS requires a
//! confluence plus at least one structural breakout (box or channel);
//! VS wakeup requires sitting inside an active box while the bullish
//! confluence-wakeup signal fires.

use serde::Serialize;

use crate::candles::Frame;
use crate::detectors::{channel, confluence, consolidation, sma50};
use crate::models::{Direction, StrengthLabel};

/// Which structural breakout backed the HBS signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HbsContext {
    Both,
    ConsolidationBreakout,
    ChannelBreakout,
}

impl HbsContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            HbsContext::Both => "both",
            HbsContext::ConsolidationBreakout => "consolidation_breakout",
            HbsContext::ChannelBreakout => "channel_breakout",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HbsPayload {
    pub direction: Direction,
    pub breakout_type: HbsContext,
    /// Strength propagated from the consolidation breakout; channel-only
    /// signals carry none.
    pub strong: bool,
    pub strength_label: Option<StrengthLabel>,
    pub extreme_volume: bool,
    pub extreme_spread: bool,
    pub has_sma50_breakout: bool,
    pub sma50_breakout_type: Option<sma50::BreakoutType>,
    pub sma50_strength: Option<StrengthLabel>,
    pub sma50_is_strong: bool,
    pub has_engulfing_reversal: bool,
    pub confluence_direction: String,
    pub has_volume_breakout: bool,
    pub box_age: i64,
    pub height_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VsWakeupPayload {
    pub box_age: i64,
    pub direction: String,
}

pub fn detect_hbs_breakout(frame: &Frame, check_bar: i64) -> Option<HbsPayload> {
    let cf = confluence::detect(frame, check_bar, &confluence::Options::bullish())?;

    let cb = consolidation::detect_breakout(
        frame,
        check_bar,
        &consolidation::BreakoutOptions::default(),
    );
    let chb = channel::detect_channel_breakout(frame, check_bar, true);
    if cb.is_none() && chb.is_none() {
        return None;
    }

    let sma = sma50::detect(frame, check_bar, &sma50::Options::default());
    let sma50_is_strong = sma
        .as_ref()
        .map(|p| {
            p.breakout_type == sma50::BreakoutType::Regular
                && p.strength == Some(StrengthLabel::Strong)
        })
        .unwrap_or(false);

    let (breakout_type, direction, strong, strength_label, box_age, height_pct) =
        match (&cb, &chb) {
            (Some(cb), Some(chb)) => (
                HbsContext::Both,
                chb.direction,
                cb.strong,
                Some(cb.strength_label),
                cb.box_age,
                chb.height_pct,
            ),
            (Some(cb), None) => (
                HbsContext::ConsolidationBreakout,
                cb.direction,
                cb.strong,
                Some(cb.strength_label),
                cb.box_age,
                cb.height_pct,
            ),
            (None, Some(chb)) => (
                HbsContext::ChannelBreakout,
                chb.direction,
                false,
                None,
                chb.channel_age,
                chb.height_pct,
            ),
            (None, None) => unreachable!(),
        };

    Some(HbsPayload {
        direction,
        breakout_type,
        strong,
        strength_label,
        extreme_volume: cf.extreme_volume,
        extreme_spread: cf.extreme_spread,
        has_sma50_breakout: sma.is_some(),
        sma50_breakout_type: sma.as_ref().map(|p| p.breakout_type),
        sma50_strength: sma.as_ref().and_then(|p| p.strength),
        sma50_is_strong,
        has_engulfing_reversal: cf.is_engulfing_reversal,
        confluence_direction: cf.direction,
        has_volume_breakout: cf.volume_breakout && !cf.extreme_volume,
        box_age,
        height_pct,
    })
}

pub fn detect_vs_wakeup(frame: &Frame, check_bar: i64) -> Option<VsWakeupPayload> {
    // Inside an active box, not breaking out of it.
    let cons = consolidation::detect_consolidation(frame, check_bar)?;
    let wakeup = confluence::detect(frame, check_bar, &confluence::Options::wakeup())?;
    Some(VsWakeupPayload {
        box_age: cons.box_age,
        direction: wakeup.direction,
    })
}
