use crate::feed::types::{TradeEvent, HISTORY_CAPACITY};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<TradeEvent>,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_CAPACITY + 1),
        }
    }
}

impl HistoryBuffer {
    pub fn push(&mut self, event: TradeEvent) {
        self.entries.push_front(event);
        self.entries.truncate(HISTORY_CAPACITY);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&TradeEvent> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TradeEvent> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<TradeEvent> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn trade(sequence: i64) -> TradeEvent {
        TradeEvent::new(Decimal::from(sequence), Decimal::ONE, Utc::now())
    }

    #[test]
    fn newest_entry_is_first() {
        let mut history = HistoryBuffer::default();
        history.push(trade(1));
        history.push(trade(2));

        let prices: Vec<Decimal> = history.iter().map(TradeEvent::price).collect();
        assert_eq!(prices, vec![Decimal::from(2), Decimal::from(1)]);
        assert_eq!(history.latest().map(TradeEvent::price), Some(Decimal::from(2)));
    }

    #[test]
    fn keeps_only_most_recent_fifty() {
        let mut history = HistoryBuffer::default();
        for sequence in 1..=120 {
            history.push(trade(sequence));
            assert!(history.len() <= HISTORY_CAPACITY);
        }

        assert_eq!(history.len(), HISTORY_CAPACITY);
        let prices: Vec<Decimal> = history.iter().map(TradeEvent::price).collect();
        let expected: Vec<Decimal> = (71..=120).rev().map(Decimal::from).collect();
        assert_eq!(prices, expected);
    }

    #[test]
    fn clear_empties_regardless_of_size() {
        let mut history = HistoryBuffer::default();
        history.clear();
        assert!(history.is_empty());

        for sequence in 0..75 {
            history.push(trade(sequence));
        }
        history.clear();
        assert!(history.is_empty());
        assert!(history.to_vec().is_empty());
        assert!(history.latest().is_none());
    }
}
