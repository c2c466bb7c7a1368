//! Per-instrument cursor over a series, with order execution.
//!
//! In backtest mode the cursor walks a fixed series and nothing after it is
//! visible. In live mode observations arrive through
//! [`InstrumentStream::advance_with`] and the oldest rows are evicted once the
//! lookback is exceeded; the cursor is kept as an absolute count so pending
//! orders survive eviction.
//!
//! Immediate fills (`BarClose`, `Market`) execute against the observation at
//! the cursor. Deferred fills queue and execute, in submission order, against
//! the first observation after the one they were submitted on. Closing
//! volumes are clipped against the position at execution time.

use chrono::NaiveDateTime;

use super::bar::Observation;
use super::error::ExecutionError;
use super::instrument::InstrumentKey;
use super::order::{Action, FillPolicy, OrderId, OrderQueue, PendingOrder};
use super::portfolio::FillMethod;
use super::position::{Position, Trade, TradeAction};
use super::series::TimeSeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Backtest,
    /// Rolling buffer of at most `lookback` rows; 0 keeps everything.
    Live { lookback: usize },
}

/// Outcome of [`InstrumentStream::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Filled(Trade),
    Queued(OrderId),
    /// Nothing to do, e.g. closing a side that is not held.
    Discarded,
}

#[derive(Debug, Clone)]
pub struct InstrumentStream<T> {
    key: InstrumentKey,
    mode: StreamMode,
    series: TimeSeries<T>,
    cursor: usize,
    evicted: usize,
    position: Position,
    pending: OrderQueue,
    trades: Vec<Trade>,
}

/// Price `policy` executes at on `obs`, if it is finite.
fn fill_price<T: Observation>(obs: &T, policy: FillPolicy, buy: bool) -> Option<f64> {
    let price = match policy {
        FillPolicy::BarClose | FillPolicy::NextClose => obs.close(),
        FillPolicy::NextOpen => obs.open(),
        FillPolicy::NextHigh => obs.high(),
        FillPolicy::NextLow => obs.low(),
        FillPolicy::Market => {
            let book = if buy { obs.best_ask() } else { obs.best_bid() };
            book.unwrap_or_else(|| obs.close())
        }
        FillPolicy::Limit { price } => price,
    };
    price.is_finite().then_some(price)
}

impl<T: Observation> InstrumentStream<T> {
    /// Cursor starts on the first row.
    pub fn backtest(key: InstrumentKey, series: TimeSeries<T>) -> Self {
        Self::with_mode(key, StreamMode::Backtest, series, 0)
    }

    /// Cursor starts on the newest row of `history`.
    pub fn live(key: InstrumentKey, lookback: usize, mut history: TimeSeries<T>) -> Self {
        if lookback > 0 {
            history.keep_last(lookback);
        }
        let cursor = history.len().saturating_sub(1);
        Self::with_mode(key, StreamMode::Live { lookback }, history, cursor)
    }

    fn with_mode(key: InstrumentKey, mode: StreamMode, series: TimeSeries<T>, cursor: usize) -> Self {
        Self {
            key,
            mode,
            series,
            cursor,
            evicted: 0,
            position: Position::default(),
            pending: OrderQueue::new(),
            trades: Vec::new(),
        }
    }

    pub fn key(&self) -> &InstrumentKey {
        &self.key
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn is_live(&self) -> bool {
        matches!(self.mode, StreamMode::Live { .. })
    }

    /// Every row held, including those after the cursor in backtest mode.
    pub fn series(&self) -> &TimeSeries<T> {
        &self.series
    }

    /// Absolute cursor: rows stepped over since the stream started.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn local_cursor(&self) -> Option<usize> {
        self.cursor
            .checked_sub(self.evicted)
            .filter(|i| *i < self.series.len())
    }

    pub fn current(&self) -> Option<&T> {
        self.series.get(self.local_cursor()?)
    }

    pub fn current_timestamp(&self) -> Option<NaiveDateTime> {
        self.current().map(|o| o.timestamp())
    }

    /// Rows visible to a strategy: up to and including the cursor in backtest
    /// mode, the whole buffer in live mode.
    pub fn bars(&self) -> &[T] {
        let rows = self.series.as_slice();
        match self.mode {
            StreamMode::Live { .. } => rows,
            StreamMode::Backtest => match self.local_cursor() {
                Some(i) => &rows[..=i],
                None => &[],
            },
        }
    }

    /// The last `n` visible rows.
    pub fn window(&self, n: usize) -> &[T] {
        let bars = self.bars();
        &bars[bars.len().saturating_sub(n)..]
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars().iter().map(|o| o.close()).collect()
    }

    pub fn has_next(&self) -> bool {
        match self.mode {
            StreamMode::Backtest => self
                .local_cursor()
                .is_some_and(|i| i + 1 < self.series.len()),
            StreamMode::Live { .. } => false,
        }
    }

    /// Steps to the next stored row and executes due orders. Returns false at
    /// the end of the series, and always in live mode.
    pub fn advance_cursor(&mut self) -> bool {
        if !self.has_next() {
            return false;
        }
        self.cursor += 1;
        self.resolve_pending();
        true
    }

    /// Appends a newly arrived observation, moves the cursor onto it and
    /// executes due orders.
    pub fn advance_with(&mut self, observation: T) -> Result<(), ExecutionError> {
        self.series
            .push(observation)
            .map_err(|(timestamp, last)| ExecutionError::OutOfOrder { timestamp, last })?;
        if let StreamMode::Live { lookback } = self.mode {
            if lookback > 0 && self.series.len() > lookback {
                let excess = self.series.len() - lookback;
                self.series.drop_front(excess);
                self.evicted += excess;
            }
        }
        self.cursor = self.evicted + self.series.len() - 1;
        self.resolve_pending();
        Ok(())
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn pending_orders(&self) -> impl Iterator<Item = &PendingOrder> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn cancel(&mut self, id: OrderId) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Drops every pending order, returning how many there were.
    pub fn clear_pending(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    /// Executes `action` now or queues it, depending on `policy`.
    ///
    /// Immediate fills fail with [`ExecutionError::PriceUnavailable`] when the
    /// observation at the cursor has no finite price for them. Deferred fills
    /// never fail here; an order whose price is unavailable when due stays
    /// queued for the following observation.
    pub fn submit(&mut self, action: Action, policy: FillPolicy) -> Result<Submission, ExecutionError> {
        action.validate()?;
        if let FillPolicy::Limit { price } = policy {
            if !price.is_finite() || price <= 0.0 {
                return Err(ExecutionError::MissingLimitPrice);
            }
        }

        if policy.is_deferred() {
            let resolve_at = if self.current().is_some() {
                self.cursor + 1
            } else {
                self.cursor
            };
            let id = self
                .pending
                .push(action, policy, self.current_timestamp(), resolve_at);
            log::debug!(
                "{}: queued {:?} ({}) for cursor {}",
                self.key,
                action,
                policy.label(),
                resolve_at
            );
            return Ok(Submission::Queued(id));
        }

        let cursor = self.cursor;
        let Some(obs) = self.current() else {
            return Err(ExecutionError::PriceUnavailable { cursor });
        };
        let Some((trade_action, volume)) = self.plan(action) else {
            log::debug!("{}: {:?} has nothing to do", self.key, action);
            return Ok(Submission::Discarded);
        };
        let price = fill_price(obs, policy, trade_action.is_buy())
            .ok_or(ExecutionError::PriceUnavailable { cursor })?;
        let timestamp = obs.timestamp();
        Ok(Submission::Filled(
            self.execute(trade_action, volume, price, timestamp)?,
        ))
    }

    pub fn open_long(&mut self, volume: i64, policy: FillPolicy) -> Result<Submission, ExecutionError> {
        self.submit(Action::OpenLong { volume }, policy)
    }

    pub fn close_long(
        &mut self,
        volume: Option<i64>,
        policy: FillPolicy,
    ) -> Result<Submission, ExecutionError> {
        self.submit(Action::CloseLong { volume }, policy)
    }

    pub fn open_short(&mut self, volume: i64, policy: FillPolicy) -> Result<Submission, ExecutionError> {
        self.submit(Action::OpenShort { volume }, policy)
    }

    pub fn close_short(
        &mut self,
        volume: Option<i64>,
        policy: FillPolicy,
    ) -> Result<Submission, ExecutionError> {
        self.submit(Action::CloseShort { volume }, policy)
    }

    pub fn reverse(&mut self, policy: FillPolicy) -> Result<Submission, ExecutionError> {
        self.submit(Action::Reverse, policy)
    }

    pub fn close_all(&mut self, policy: FillPolicy) -> Result<Submission, ExecutionError> {
        self.submit(Action::CloseAll, policy)
    }

    /// Trade `action` amounts to against the current position, or `None` if
    /// nothing would change.
    fn plan(&self, action: Action) -> Option<(TradeAction, i64)> {
        let clip = |requested: Option<i64>, held: i64| match requested {
            Some(v) => v.min(held),
            None => held,
        };
        let (trade_action, volume) = match action {
            Action::OpenLong { volume } => (TradeAction::OpenLong, volume),
            Action::OpenShort { volume } => (TradeAction::OpenShort, volume),
            Action::CloseLong { volume } => {
                (TradeAction::CloseLong, clip(volume, self.position.long_lots()))
            }
            Action::CloseShort { volume } => {
                (TradeAction::CloseShort, clip(volume, self.position.short_lots()))
            }
            Action::Reverse if self.position.is_long() => {
                (TradeAction::CloseLongOpenShort, self.position.long_lots())
            }
            Action::Reverse => (TradeAction::CloseShortOpenLong, self.position.short_lots()),
            Action::CloseAll if self.position.is_long() => {
                (TradeAction::CloseLong, self.position.long_lots())
            }
            Action::CloseAll => (TradeAction::CloseShort, self.position.short_lots()),
        };
        (volume > 0).then_some((trade_action, volume))
    }

    fn execute(
        &mut self,
        action: TradeAction,
        volume: i64,
        price: f64,
        timestamp: NaiveDateTime,
    ) -> Result<Trade, ExecutionError> {
        let trade = Trade {
            timestamp,
            action,
            price,
            volume,
        };
        self.position.apply(&trade)?;
        log::debug!(
            "{}: {} {} @ {} -> position {}",
            self.key,
            action.label(),
            volume,
            price,
            self.position.lots()
        );
        self.trades.push(trade.clone());
        Ok(trade)
    }

    fn resolve_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let Some(obs) = self.current().cloned() else {
            return;
        };
        for id in self.pending.due(self.cursor) {
            let Some(order) = self.pending.get(id).cloned() else {
                continue;
            };
            let Some((trade_action, volume)) = self.plan(order.action) else {
                self.pending.remove(id);
                log::debug!("{}: dropped {:?}, nothing to do", self.key, order.action);
                continue;
            };
            match fill_price(&obs, order.policy, trade_action.is_buy()) {
                Some(price) => {
                    self.pending.remove(id);
                    if let Err(e) = self.execute(trade_action, volume, price, obs.timestamp()) {
                        log::warn!("{}: rejected {:?}: {e}", self.key, order.action);
                    }
                }
                None => log::debug!(
                    "{}: no {} price at {}, order {} stays queued",
                    self.key,
                    order.policy.label(),
                    obs.timestamp(),
                    id.value()
                ),
            }
        }
    }

    /// Re-lays the series on `axis`, which must contain every stored timestamp.
    /// The cursor stays on the same timestamp and pending orders keep their
    /// place relative to it. An empty series is left as is.
    pub(crate) fn reindex(&mut self, axis: &[NaiveDateTime], fill: FillMethod) {
        let Some(cursor_ts) = self.current_timestamp() else {
            return;
        };
        let old = self.series.as_slice();
        let mut rows = Vec::with_capacity(axis.len());
        let mut next = 0;
        for &ts in axis {
            while next < old.len() && old[next].timestamp() < ts {
                next += 1;
            }
            let row = match old.get(next) {
                Some(r) if r.timestamp() == ts => r.clone(),
                _ => match fill {
                    FillMethod::Forward => next
                        .checked_sub(1)
                        .map(|i| old[i].with_timestamp(ts))
                        .unwrap_or_else(|| T::void_at(ts)),
                    FillMethod::Backward => old
                        .get(next)
                        .map(|r| r.with_timestamp(ts))
                        .unwrap_or_else(|| T::void_at(ts)),
                    FillMethod::None => T::void_at(ts),
                },
            };
            rows.push(row);
        }

        let local = axis
            .binary_search(&cursor_ts)
            .unwrap_or_else(|i| i.saturating_sub(1));
        let old_cursor = self.cursor;
        let new_cursor = self.evicted + local;
        for order in self.pending.iter_mut() {
            order.resolve_at = if order.resolve_at <= old_cursor {
                new_cursor
            } else {
                new_cursor + 1
            };
        }
        self.series.replace_rows(rows);
        self.cursor = new_cursor;
    }
}
