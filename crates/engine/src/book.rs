//! Owned store of live positions and the entry counters that gate new ones.
//!
//! Limit checks and the pending insert happen under one lock, so two
//! concurrent entries for the same window can never both pass.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use updown_core::{LifecycleConfig, Position, PositionStatus};

/// Why an entry was refused before reaching the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryBlocked {
    #[error("an entry for window {0} is already in flight")]
    InFlight(String),

    #[error("entry cooldown active, {remaining_secs}s remaining")]
    Cooldown { remaining_secs: i64 },

    #[error("window limit reached: {count} of {max}")]
    WindowLimit { count: u32, max: u32 },

    #[error("daily limit reached: {count} of {max}")]
    DailyLimit { count: u32, max: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct EntryLimits {
    pub per_window: u32,
    pub per_day: u32,
    pub cooldown_secs: i64,
}

impl From<&LifecycleConfig> for EntryLimits {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            per_window: config.max_trades_per_window,
            per_day: config.max_trades_per_day,
            cooldown_secs: config.entry_cooldown_secs,
        }
    }
}

#[derive(Debug, Default)]
struct BookState {
    positions: HashMap<String, Position>,
    window_entries: HashMap<String, u32>,
    last_entry: HashMap<String, DateTime<Utc>>,
    in_flight: HashSet<String>,
    day: Option<NaiveDate>,
    day_entries: u32,
}

impl BookState {
    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.day_entries = 0;
        }
    }
}

#[derive(Debug)]
pub struct PositionBook {
    limits: EntryLimits,
    state: RwLock<BookState>,
}

impl PositionBook {
    #[must_use]
    pub fn new(limits: EntryLimits) -> Self {
        Self {
            limits,
            state: RwLock::new(BookState::default()),
        }
    }

    /// Checks every entry limit and, when they all pass, counts the entry
    /// and stores the pending position. Atomic with respect to other calls.
    pub fn reserve(&self, pending: Position, now: DateTime<Utc>) -> Result<(), EntryBlocked> {
        let mut state = self.state.write();
        state.roll_day(now);
        let window_id = pending.window_id.clone();

        if state.in_flight.contains(&window_id) {
            return Err(EntryBlocked::InFlight(window_id));
        }
        if let Some(last) = state.last_entry.get(&window_id) {
            let elapsed = (now - *last).num_seconds();
            if elapsed < self.limits.cooldown_secs {
                return Err(EntryBlocked::Cooldown {
                    remaining_secs: self.limits.cooldown_secs - elapsed,
                });
            }
        }
        let count = state.window_entries.get(&window_id).copied().unwrap_or(0);
        if count >= self.limits.per_window {
            return Err(EntryBlocked::WindowLimit {
                count,
                max: self.limits.per_window,
            });
        }
        if state.day_entries >= self.limits.per_day {
            return Err(EntryBlocked::DailyLimit {
                count: state.day_entries,
                max: self.limits.per_day,
            });
        }

        *state.window_entries.entry(window_id.clone()).or_insert(0) += 1;
        state.day_entries += 1;
        state.last_entry.insert(window_id.clone(), now);
        state.in_flight.insert(window_id);
        state.positions.insert(pending.id.clone(), pending);
        Ok(())
    }

    /// Undoes a reservation whose entry never filled. The cooldown stays.
    pub fn rollback(&self, position_id: &str) -> Option<Position> {
        let mut state = self.state.write();
        let position = state.positions.remove(position_id)?;
        if let Some(count) = state.window_entries.get_mut(&position.window_id) {
            *count = count.saturating_sub(1);
        }
        state.day_entries = state.day_entries.saturating_sub(1);
        state.in_flight.remove(&position.window_id);
        Some(position)
    }

    /// Clears the in-flight marker once an entry has been confirmed.
    pub fn finish_entry(&self, window_id: &str) {
        self.state.write().in_flight.remove(window_id);
    }

    /// Takes ownership of a restored position. It counts against its window.
    pub fn adopt(&self, position: Position) -> bool {
        let mut state = self.state.write();
        if state.positions.contains_key(&position.id) {
            return false;
        }
        *state
            .window_entries
            .entry(position.window_id.clone())
            .or_insert(0) += 1;
        state.positions.insert(position.id.clone(), position);
        true
    }

    /// Applies `f` to a position in place.
    pub fn update<R>(&self, position_id: &str, f: impl FnOnce(&mut Position) -> R) -> Option<R> {
        let mut state = self.state.write();
        state.positions.get_mut(position_id).map(f)
    }

    #[must_use]
    pub fn get(&self, position_id: &str) -> Option<Position> {
        self.state.read().positions.get(position_id).cloned()
    }

    pub fn remove(&self, position_id: &str) -> Option<Position> {
        self.state.write().positions.remove(position_id)
    }

    /// Drops the entry counters of a window that can no longer be traded.
    /// Positions held in it are untouched.
    pub fn forget_window(&self, window_id: &str) {
        let mut state = self.state.write();
        state.window_entries.remove(window_id);
        state.last_entry.remove(window_id);
        state.in_flight.remove(window_id);
    }

    /// Positions that hold shares: open, or partially exited.
    #[must_use]
    pub fn open_positions(&self) -> Vec<Position> {
        let mut open: Vec<Position> = self
            .state
            .read()
            .positions
            .values()
            .filter(|p| matches!(p.status, PositionStatus::Open | PositionStatus::Exiting))
            .cloned()
            .collect();
        open.sort_by(|a, b| a.entry_time.cmp(&b.entry_time));
        open
    }

    #[must_use]
    pub fn window_entries(&self, window_id: &str) -> u32 {
        self.state
            .read()
            .window_entries
            .get(window_id)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn day_entries(&self) -> u32 {
        self.state.read().day_entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use updown_core::{Asset, Outcome, PendingEntry};

    fn limits() -> EntryLimits {
        EntryLimits::from(&LifecycleConfig::default())
    }

    fn pending(id: &str, window: &str, now: DateTime<Utc>) -> Position {
        Position::pending(PendingEntry {
            id: id.to_string(),
            window_id: window.to_string(),
            asset: Asset::Btc,
            outcome: Outcome::Up,
            token_id: "tok".to_string(),
            window_end: now + chrono::Duration::minutes(10),
            reference_price: dec!(90000),
            entry_move: dec!(0.0025),
            limit_price: dec!(0.42),
            size: dec!(10),
            created_at: now,
        })
    }

    #[test]
    fn in_flight_blocks_second_entry() {
        let book = PositionBook::new(limits());
        let now = Utc::now();
        book.reserve(pending("a", "w", now), now).unwrap();
        assert_eq!(
            book.reserve(pending("b", "w", now), now),
            Err(EntryBlocked::InFlight("w".to_string()))
        );
        assert!(book.reserve(pending("c", "other", now), now).is_ok());
    }

    #[test]
    fn cooldown_survives_rollback() {
        let book = PositionBook::new(limits());
        let now = Utc::now();
        book.reserve(pending("a", "w", now), now).unwrap();
        book.rollback("a").unwrap();

        assert_eq!(book.window_entries("w"), 0);
        assert_eq!(book.day_entries(), 0);
        let soon = now + chrono::Duration::seconds(3);
        assert!(matches!(
            book.reserve(pending("b", "w", soon), soon),
            Err(EntryBlocked::Cooldown { remaining_secs: 7 })
        ));
        let later = now + chrono::Duration::seconds(10);
        assert!(book.reserve(pending("c", "w", later), later).is_ok());
    }

    #[test]
    fn window_limit_counts_filled_entries() {
        let book = PositionBook::new(limits());
        let mut now = Utc::now();
        for i in 0..3 {
            book.reserve(pending(&format!("p{i}"), "w", now), now).unwrap();
            book.finish_entry("w");
            now += chrono::Duration::seconds(11);
        }
        assert_eq!(
            book.reserve(pending("p3", "w", now), now),
            Err(EntryBlocked::WindowLimit { count: 3, max: 3 })
        );
    }

    #[test]
    fn daily_limit_resets_on_new_day() {
        let book = PositionBook::new(EntryLimits {
            per_window: 10,
            per_day: 2,
            cooldown_secs: 0,
        });
        let now = Utc::now();
        book.reserve(pending("a", "w1", now), now).unwrap();
        book.reserve(pending("b", "w2", now), now).unwrap();
        assert!(matches!(
            book.reserve(pending("c", "w3", now), now),
            Err(EntryBlocked::DailyLimit { count: 2, max: 2 })
        ));

        let tomorrow = now + chrono::Duration::days(1);
        assert!(book.reserve(pending("d", "w4", tomorrow), tomorrow).is_ok());
    }

    #[test]
    fn pending_positions_are_not_open() {
        let book = PositionBook::new(limits());
        let now = Utc::now();
        book.reserve(pending("a", "w", now), now).unwrap();
        assert!(book.open_positions().is_empty());

        book.update("a", |p| p.confirm_entry(dec!(10), dec!(0.42), dec!(0.33), now))
            .unwrap()
            .unwrap();
        assert_eq!(book.open_positions().len(), 1);
    }

    #[test]
    fn adopt_counts_against_window() {
        let book = PositionBook::new(limits());
        let now = Utc::now();
        let mut restored = pending("r", "w", now);
        restored
            .confirm_entry(dec!(10), dec!(0.42), dec!(0.33), now)
            .unwrap();

        assert!(book.adopt(restored.clone()));
        assert!(!book.adopt(restored));
        assert_eq!(book.window_entries("w"), 1);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn forget_window_clears_counters_but_keeps_positions() {
        let book = PositionBook::new(limits());
        let now = Utc::now();
        book.reserve(pending("a", "w", now), now).unwrap();
        book.update("a", |p| p.confirm_entry(dec!(10), dec!(0.42), dec!(0.33), now))
            .unwrap()
            .unwrap();
        book.finish_entry("w");
        assert_eq!(book.window_entries("w"), 1);

        book.forget_window("w");
        assert_eq!(book.window_entries("w"), 0);
        assert_eq!(book.len(), 1);
        assert!(book.get("a").is_some());

        // no cooldown left behind either
        assert!(book.reserve(pending("b", "w", now), now).is_ok());
    }
}
