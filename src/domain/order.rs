//! Order intents, fill policies and the pending-order queue.

use std::collections::VecDeque;

use chrono::NaiveDateTime;

use super::error::ExecutionError;

/// What the caller wants to happen to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    OpenLong { volume: i64 },
    /// `None` closes the whole long side.
    CloseLong { volume: Option<i64> },
    OpenShort { volume: i64 },
    /// `None` closes the whole short side.
    CloseShort { volume: Option<i64> },
    /// Flip the current position to the same size on the other side.
    Reverse,
    /// Flatten whatever is held.
    CloseAll,
}

impl Action {
    pub fn validate(&self) -> Result<(), ExecutionError> {
        let volume = match self {
            Action::OpenLong { volume } | Action::OpenShort { volume } => Some(*volume),
            Action::CloseLong { volume } | Action::CloseShort { volume } => *volume,
            Action::Reverse | Action::CloseAll => None,
        };
        match volume {
            Some(v) if v <= 0 => Err(ExecutionError::InvalidVolume { volume: v }),
            _ => Ok(()),
        }
    }
}

/// Which price an order executes at, and when.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillPolicy {
    /// Current bar's close, immediately.
    BarClose,
    NextOpen,
    NextClose,
    NextHigh,
    NextLow,
    /// Best ask for buys, best bid for sells, falling back to the close; immediately.
    Market,
    /// The given price, on the next observation.
    Limit { price: f64 },
}

impl FillPolicy {
    /// Deferred policies wait for the next observation.
    pub fn is_deferred(&self) -> bool {
        !matches!(self, FillPolicy::BarClose | FillPolicy::Market)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FillPolicy::BarClose => "bar_close",
            FillPolicy::NextOpen => "next_bar_open",
            FillPolicy::NextClose => "next_bar_close",
            FillPolicy::NextHigh => "next_bar_high",
            FillPolicy::NextLow => "next_bar_low",
            FillPolicy::Market => "market",
            FillPolicy::Limit { .. } => "limit",
        }
    }
}

/// Stable handle to a queued order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderId(u64);

impl OrderId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub id: OrderId,
    pub action: Action,
    pub policy: FillPolicy,
    pub submitted_at: Option<NaiveDateTime>,
    /// Absolute cursor at or after which the order may execute.
    pub resolve_at: usize,
}

/// FIFO arena of pending orders. Ids stay valid until their order is removed;
/// removed slots are reclaimed from the front only, so ids are never reused.
#[derive(Debug, Clone, Default)]
pub struct OrderQueue {
    slots: VecDeque<Option<PendingOrder>>,
    base: u64,
    live: usize,
}

impl OrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        action: Action,
        policy: FillPolicy,
        submitted_at: Option<NaiveDateTime>,
        resolve_at: usize,
    ) -> OrderId {
        let id = OrderId(self.base + self.slots.len() as u64);
        self.slots.push_back(Some(PendingOrder {
            id,
            action,
            policy,
            submitted_at,
            resolve_at,
        }));
        self.live += 1;
        id
    }

    fn slot(&self, id: OrderId) -> Option<usize> {
        let offset = id.0.checked_sub(self.base)?;
        usize::try_from(offset).ok().filter(|i| *i < self.slots.len())
    }

    pub fn get(&self, id: OrderId) -> Option<&PendingOrder> {
        self.slots.get(self.slot(id)?)?.as_ref()
    }

    /// Removes an order, returning it if it was still pending.
    pub fn remove(&mut self, id: OrderId) -> Option<PendingOrder> {
        let idx = self.slot(id)?;
        let order = self.slots.get_mut(idx)?.take()?;
        self.live -= 1;
        while matches!(self.slots.front(), Some(None)) {
            self.slots.pop_front();
            self.base += 1;
        }
        Some(order)
    }

    /// Ids of orders whose `resolve_at` has been reached, in submission order.
    pub fn due(&self, cursor: usize) -> Vec<OrderId> {
        self.iter()
            .filter(|o| o.resolve_at <= cursor)
            .map(|o| o.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingOrder> {
        self.slots.iter().flatten()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut PendingOrder> {
        self.slots.iter_mut().flatten()
    }

    pub fn clear(&mut self) {
        self.base += self.slots.len() as u64;
        self.slots.clear();
        self.live = 0;
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
