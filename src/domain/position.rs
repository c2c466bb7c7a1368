//! Net position and executed trades.

use chrono::NaiveDateTime;

use super::error::ExecutionError;

/// What an executed trade did to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeAction {
    OpenLong,
    CloseLong,
    OpenShort,
    CloseShort,
    /// Flattened a long and opened a short of the same size.
    CloseLongOpenShort,
    /// Flattened a short and opened a long of the same size.
    CloseShortOpenLong,
}

impl TradeAction {
    /// Buys lift the offer; sells hit the bid.
    pub fn is_buy(&self) -> bool {
        matches!(
            self,
            TradeAction::OpenLong | TradeAction::CloseShort | TradeAction::CloseShortOpenLong
        )
    }

    /// Change in net lots when this action executes `volume` lots.
    /// Reversals move the position by twice their volume. `None` on overflow.
    pub fn signed_lots(&self, volume: i64) -> Option<i64> {
        match self {
            TradeAction::OpenLong | TradeAction::CloseShort => Some(volume),
            TradeAction::OpenShort | TradeAction::CloseLong => volume.checked_neg(),
            TradeAction::CloseShortOpenLong => volume.checked_mul(2),
            TradeAction::CloseLongOpenShort => volume.checked_mul(-2),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TradeAction::OpenLong => "open_long",
            TradeAction::CloseLong => "close_long",
            TradeAction::OpenShort => "open_short",
            TradeAction::CloseShort => "close_short",
            TradeAction::CloseLongOpenShort => "close_long_open_short",
            TradeAction::CloseShortOpenLong => "close_short_open_long",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub timestamp: NaiveDateTime,
    pub action: TradeAction,
    pub price: f64,
    /// Lots per leg; always positive.
    pub volume: i64,
}

impl Trade {
    pub fn signed_lots(&self) -> Option<i64> {
        self.action.signed_lots(self.volume)
    }
}

/// Net signed lots: positive long, negative short.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    lots: i64,
}

impl Position {
    pub fn lots(&self) -> i64 {
        self.lots
    }

    pub fn is_long(&self) -> bool {
        self.lots > 0
    }

    pub fn is_short(&self) -> bool {
        self.lots < 0
    }

    pub fn is_flat(&self) -> bool {
        self.lots == 0
    }

    /// Lots a close-long can still take.
    pub fn long_lots(&self) -> i64 {
        self.lots.max(0)
    }

    /// Lots a close-short can still take.
    pub fn short_lots(&self) -> i64 {
        (-self.lots).max(0)
    }

    /// Position after `action` executes `volume` lots, or `None` when the net
    /// lots would leave the representable range.
    pub fn after(&self, action: TradeAction, volume: i64) -> Option<Position> {
        let lots = self
            .lots
            .checked_add(action.signed_lots(volume)?)
            .filter(|l| *l != i64::MIN)?;
        Some(Position { lots })
    }

    pub(crate) fn apply(&mut self, trade: &Trade) -> Result<(), ExecutionError> {
        *self = self
            .after(trade.action, trade.volume)
            .ok_or(ExecutionError::InvalidVolume {
                volume: trade.volume,
            })?;
        Ok(())
    }
}
