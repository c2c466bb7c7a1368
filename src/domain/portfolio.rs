//! Multi-instrument stream set with timestamp alignment.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;

use super::bar::Observation;
use super::instrument::InstrumentKey;
use super::stream::InstrumentStream;

/// How axis slots an instrument has no row for are filled during alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMethod {
    /// Carry the previous row forward.
    #[default]
    Forward,
    /// Pull the next row backward.
    Backward,
    /// Leave a void row with non-finite prices.
    None,
}

#[derive(Debug, Clone)]
pub struct PortfolioSourceSet<T> {
    streams: Vec<InstrumentStream<T>>,
}

impl<T> Default for PortfolioSourceSet<T> {
    fn default() -> Self {
        Self {
            streams: Vec::new(),
        }
    }
}

impl<T: Observation> PortfolioSourceSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stream and returns its index.
    pub fn add(&mut self, stream: InstrumentStream<T>) -> usize {
        self.streams.push(stream);
        self.streams.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&InstrumentStream<T>> {
        self.streams.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut InstrumentStream<T>> {
        self.streams.get_mut(index)
    }

    pub fn find(&self, key: &InstrumentKey) -> Option<&InstrumentStream<T>> {
        self.streams.iter().find(|s| s.key() == key)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstrumentStream<T>> {
        self.streams.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut InstrumentStream<T>> {
        self.streams.iter_mut()
    }

    /// Union of every stored timestamp across non-empty streams, ascending.
    pub fn union_axis(&self) -> Vec<NaiveDateTime> {
        let axis: BTreeSet<NaiveDateTime> = self
            .streams
            .iter()
            .flat_map(|s| s.series().timestamps())
            .collect();
        axis.into_iter().collect()
    }

    /// Re-lays every non-empty stream on the union axis so all of them share
    /// one timeline. Does nothing with fewer than two streams.
    pub fn align(&mut self, fill: FillMethod) {
        if self.streams.len() < 2 {
            return;
        }
        let axis = self.union_axis();
        if axis.is_empty() {
            return;
        }
        for stream in &mut self.streams {
            stream.reindex(&axis, fill);
        }
        log::debug!(
            "aligned {} streams on {} timestamps ({:?} fill)",
            self.streams.len(),
            axis.len(),
            fill
        );
    }

    /// Advances every stream one row. Returns false once none could move.
    pub fn advance_all(&mut self) -> bool {
        let mut moved = false;
        for stream in &mut self.streams {
            moved |= stream.advance_cursor();
        }
        moved
    }

    /// Net lots per instrument, in insertion order.
    pub fn positions(&self) -> Vec<(&InstrumentKey, i64)> {
        self.streams
            .iter()
            .map(|s| (s.key(), s.position().lots()))
            .collect()
    }
}
