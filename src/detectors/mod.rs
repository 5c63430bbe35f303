//! Pattern detection engine
//!
//! Every detector is a pure function `(frame, check_bar) -> Option<payload>`
//! with `check_bar = -1` for the currently forming bar and `-2` for the
//! last closed one. Short frames return `None`, never an error. Composed
//! strategies (HBS breakout, VS wakeup) call the primitives through the
//! same registry the scanner uses.

pub mod channel;
pub mod composed;
pub mod confluence;
pub mod consolidation;
pub mod engulfing;
pub mod pins;
pub mod sma50;
pub mod trend;
pub mod volume_surge;
pub mod vsa;

use serde::Serialize;

use crate::candles::Frame;

/// Strategy names as the configuration surface spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    BreakoutBar,
    StopBar,
    ReversalBar,
    StartBar,
    LoadedBar,
    TestBar,
    VolumeSurge,
    PinDown,
    PinUp,
    Confluence,
    BullishEngulfing,
    Consolidation,
    ConsolidationBreakout,
    Channel,
    ChannelBreakout,
    WedgeBreakout,
    Sma50Breakout,
    TrendBreakout,
    HbsBreakout,
    VsWakeup,
}

impl Strategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "breakout_bar" => Some(Strategy::BreakoutBar),
            "stop_bar" => Some(Strategy::StopBar),
            "reversal_bar" => Some(Strategy::ReversalBar),
            "start_bar" => Some(Strategy::StartBar),
            "loaded_bar" => Some(Strategy::LoadedBar),
            "test_bar" => Some(Strategy::TestBar),
            "volume_surge" => Some(Strategy::VolumeSurge),
            "pin_down" => Some(Strategy::PinDown),
            "pin_up" => Some(Strategy::PinUp),
            "confluence" => Some(Strategy::Confluence),
            "bullish_engulfing" => Some(Strategy::BullishEngulfing),
            "consolidation" => Some(Strategy::Consolidation),
            "consolidation_breakout" => Some(Strategy::ConsolidationBreakout),
            "channel" => Some(Strategy::Channel),
            "channel_breakout" => Some(Strategy::ChannelBreakout),
            "wedge_breakout" => Some(Strategy::WedgeBreakout),
            "sma50_breakout" => Some(Strategy::Sma50Breakout),
            "trend_breakout" => Some(Strategy::TrendBreakout),
            "hbs_breakout" => Some(Strategy::HbsBreakout),
            "vs_wakeup" => Some(Strategy::VsWakeup),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::BreakoutBar => "breakout_bar",
            Strategy::StopBar => "stop_bar",
            Strategy::ReversalBar => "reversal_bar",
            Strategy::StartBar => "start_bar",
            Strategy::LoadedBar => "loaded_bar",
            Strategy::TestBar => "test_bar",
            Strategy::VolumeSurge => "volume_surge",
            Strategy::PinDown => "pin_down",
            Strategy::PinUp => "pin_up",
            Strategy::Confluence => "confluence",
            Strategy::BullishEngulfing => "bullish_engulfing",
            Strategy::Consolidation => "consolidation",
            Strategy::ConsolidationBreakout => "consolidation_breakout",
            Strategy::Channel => "channel",
            Strategy::ChannelBreakout => "channel_breakout",
            Strategy::WedgeBreakout => "wedge_breakout",
            Strategy::Sma50Breakout => "sma50_breakout",
            Strategy::TrendBreakout => "trend_breakout",
            Strategy::HbsBreakout => "hbs_breakout",
            Strategy::VsWakeup => "vs_wakeup",
        }
    }

    /// Headline used in notification messages.
    pub fn title(&self) -> &'static str {
        match self {
            Strategy::BreakoutBar => "Breakout Bar",
            Strategy::StopBar => "Stop Bar",
            Strategy::ReversalBar => "Reversal Bar",
            Strategy::StartBar => "Start Bar",
            Strategy::LoadedBar => "Loaded Bar",
            Strategy::TestBar => "Test Bar",
            Strategy::VolumeSurge => "Sudden Volume Surge",
            Strategy::PinDown => "Pin Down Detection",
            Strategy::PinUp => "Pin Up Pattern",
            Strategy::Confluence => "Confluence Signal",
            Strategy::BullishEngulfing => "Bullish Engulfing Reversal",
            Strategy::Consolidation => "Consolidation Pattern",
            Strategy::ConsolidationBreakout => "Consolidation Breakout Pattern",
            Strategy::Channel => "Ongoing Channel Pattern",
            Strategy::ChannelBreakout => "Channel Breakout Pattern",
            Strategy::WedgeBreakout => "Wedge Breakout Pattern",
            Strategy::Sma50Breakout => "50SMA Breakout",
            Strategy::TrendBreakout => "Trend Breakout Pattern",
            Strategy::HbsBreakout => "HBS Breakout",
            Strategy::VsWakeup => "VS Wakeup",
        }
    }

    pub fn is_vsa(&self) -> bool {
        matches!(
            self,
            Strategy::BreakoutBar
                | Strategy::StopBar
                | Strategy::ReversalBar
                | Strategy::StartBar
                | Strategy::LoadedBar
                | Strategy::TestBar
        )
    }

    /// Composed strategies reuse primitive detections on the same frame.
    pub fn is_composed(&self) -> bool {
        matches!(self, Strategy::HbsBreakout | Strategy::VsWakeup)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy-specific detection payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Payload {
    Vsa(vsa::VsaPayload),
    VolumeSurge(volume_surge::VolumeSurgePayload),
    PinDown(pins::PinDownPayload),
    PinUp(pins::PinUpPayload),
    Confluence(confluence::ConfluencePayload),
    BullishEngulfing(engulfing::EngulfingPayload),
    Consolidation(consolidation::ConsolidationPayload),
    ConsolidationBreakout(consolidation::ConsolidationBreakoutPayload),
    Channel(channel::ChannelPayload),
    ChannelBreakout(channel::ChannelBreakoutPayload),
    WedgeBreakout(channel::WedgeBreakoutPayload),
    Sma50Breakout(sma50::Sma50Payload),
    TrendBreakout(trend::TrendPayload),
    HbsBreakout(composed::HbsPayload),
    VsWakeup(composed::VsWakeupPayload),
}

/// Run one strategy against a frame at the given check bar.
pub fn run(strategy: Strategy, frame: &Frame, check_bar: i64) -> Option<Payload> {
    match strategy {
        Strategy::BreakoutBar => {
            vsa::detect(frame, check_bar, &vsa::breakout_bar_params()).map(Payload::Vsa)
        }
        Strategy::StopBar => {
            vsa::detect(frame, check_bar, &vsa::stop_bar_params()).map(Payload::Vsa)
        }
        Strategy::ReversalBar => {
            vsa::detect(frame, check_bar, &vsa::reversal_bar_params()).map(Payload::Vsa)
        }
        Strategy::LoadedBar => {
            vsa::detect(frame, check_bar, &vsa::loaded_bar_params()).map(Payload::Vsa)
        }
        Strategy::StartBar => vsa::detect_start_bar(frame, check_bar).map(Payload::Vsa),
        Strategy::TestBar => vsa::detect_test_bar(frame, check_bar).map(Payload::Vsa),
        Strategy::VolumeSurge => {
            volume_surge::detect(frame, check_bar).map(Payload::VolumeSurge)
        }
        Strategy::PinDown => pins::detect_pin_down(frame, check_bar).map(Payload::PinDown),
        Strategy::PinUp => pins::detect_pin_up(frame, check_bar).map(Payload::PinUp),
        Strategy::Confluence => {
            confluence::detect(frame, check_bar, &confluence::Options::bullish())
                .map(Payload::Confluence)
        }
        Strategy::BullishEngulfing => {
            engulfing::detect(frame, check_bar).map(Payload::BullishEngulfing)
        }
        Strategy::Consolidation => {
            consolidation::detect_consolidation(frame, check_bar).map(Payload::Consolidation)
        }
        Strategy::ConsolidationBreakout => {
            consolidation::detect_breakout(frame, check_bar, &consolidation::BreakoutOptions::default())
                .map(Payload::ConsolidationBreakout)
        }
        Strategy::Channel => channel::detect_channel(frame, check_bar).map(Payload::Channel),
        Strategy::ChannelBreakout => {
            channel::detect_channel_breakout(frame, check_bar, true).map(Payload::ChannelBreakout)
        }
        Strategy::WedgeBreakout => {
            channel::detect_wedge_breakout(frame, check_bar, true).map(Payload::WedgeBreakout)
        }
        Strategy::Sma50Breakout => {
            sma50::detect(frame, check_bar, &sma50::Options::default()).map(Payload::Sma50Breakout)
        }
        Strategy::TrendBreakout => trend::detect(frame, check_bar).map(Payload::TrendBreakout),
        Strategy::HbsBreakout => composed::detect_hbs_breakout(frame, check_bar).map(Payload::HbsBreakout),
        Strategy::VsWakeup => composed::detect_vs_wakeup(frame, check_bar).map(Payload::VsWakeup),
    }
}
