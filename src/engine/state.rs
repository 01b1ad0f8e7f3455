//! Per-bot strategy state store, SPEC_FULL.md §3 "Bot Strategy State" and
//! §5's "per-bot entry owned by the bot's task" ownership rule. Generalized
//! from the teacher's per-bot `MarketState` ownership model (one state
//! record per running bot, exclusively owned, never shared across tasks).

use std::collections::HashMap;

use crate::types::{BotId, Direction};

const PRICE_HISTORY_CAP: usize = 5_000;

#[derive(Debug, Clone, PartialEq)]
pub struct BotStrategyState {
    pub tau: f64,
    pub dbar: f64,
    pub price_history: Vec<(i64, f64)>,
    pub last_decision_time_ms: Option<i64>,
    pub last_fill_time_ms: Option<i64>,
    pub last_direction_change_time_ms: Option<i64>,
    pub current_direction: Direction,
}

impl Default for BotStrategyState {
    fn default() -> Self {
        Self {
            tau: 0.5,
            dbar: 0.0,
            price_history: Vec::new(),
            last_decision_time_ms: None,
            last_fill_time_ms: None,
            last_direction_change_time_ms: None,
            current_direction: Direction::Flat,
        }
    }
}

impl BotStrategyState {
    /// Appends a (timestamp, price) sample, truncating the oldest entries
    /// once the cap is exceeded (SPEC_FULL.md §3, §9 "bounded structures").
    pub fn push_price(&mut self, ts_ms: i64, price: f64) {
        self.price_history.push((ts_ms, price));
        if self.price_history.len() > PRICE_HISTORY_CAP {
            let excess = self.price_history.len() - PRICE_HISTORY_CAP;
            self.price_history.drain(0..excess);
        }
    }

    /// Records a direction change, updating the min-hold timer only when
    /// the direction actually changes.
    pub fn set_direction(&mut self, direction: Direction, now_ms: i64) {
        if direction != self.current_direction {
            self.current_direction = direction;
            self.last_direction_change_time_ms = Some(now_ms);
        }
    }

    pub fn last_price_time(&self) -> Option<i64> {
        self.price_history.last().map(|(t, _)| *t)
    }
}

/// Owns the map of per-bot state. Per SPEC_FULL.md §5, this map is the
/// exclusive property of the supervising task; other tasks reach it only
/// through message passing, never a shared lock on the hot path.
#[derive(Debug, Default)]
pub struct BotStateStore {
    states: HashMap<BotId, BotStrategyState>,
}

impl BotStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(&mut self, bot_id: &BotId) -> &mut BotStrategyState {
        self.states.entry(bot_id.clone()).or_default()
    }

    pub fn get(&self, bot_id: &BotId) -> Option<&BotStrategyState> {
        self.states.get(bot_id)
    }

    /// Removes a bot's state entry entirely. Must be called only after the
    /// bot's task has stopped (SPEC_FULL.md §5).
    pub fn remove(&mut self, bot_id: &BotId) {
        self.states.remove(bot_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: push more than PRICE_HISTORY_CAP samples.
    /// Expected: history length is capped and the oldest samples are dropped first.
    #[test]
    fn test_price_history_truncates_from_front() {
        let mut state = BotStrategyState::default();
        for i in 0..(PRICE_HISTORY_CAP + 10) {
            state.push_price(i as i64, 0.5);
        }
        assert_eq!(state.price_history.len(), PRICE_HISTORY_CAP);
        assert_eq!(state.price_history.first().unwrap().0, 10);
    }

    /// Scenario: set_direction called twice with the same direction.
    /// Expected: last_direction_change_time_ms is set only on the first, differing call.
    #[test]
    fn test_direction_change_timer_only_updates_on_change() {
        let mut state = BotStrategyState::default();
        state.set_direction(Direction::LongYes, 100);
        assert_eq!(state.last_direction_change_time_ms, Some(100));
        state.set_direction(Direction::LongYes, 200);
        assert_eq!(state.last_direction_change_time_ms, Some(100));
        state.set_direction(Direction::LongNo, 300);
        assert_eq!(state.last_direction_change_time_ms, Some(300));
    }

    /// Scenario: remove a bot's state after insertion.
    /// Expected: the store no longer returns an entry for that bot id.
    #[test]
    fn test_remove_clears_state() {
        let mut store = BotStateStore::new();
        let id: BotId = "bot-1".to_string();
        store.get_or_insert(&id).tau = 0.9;
        store.remove(&id);
        assert!(store.get(&id).is_none());
    }
}
