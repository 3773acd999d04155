//! Frame-budgeted application of variable writes.
//!
//! Critical writes go straight to the surface. Batched writes are coalesced
//! per name (last write wins) and applied by at most one flush per frame.
//! A flush that would exceed the frame budget applies the oldest writes and
//! carries the rest to the next frame; nothing is dropped.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{render::VariableSurface, PaletteError, QualityTier, SchedulerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WritePriority {
    /// Applied synchronously on enqueue.
    Critical,
    /// Applied on the next flush.
    Batched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableWrite {
    pub name: String,
    pub value: String,
    pub priority: WritePriority,
}

impl VariableWrite {
    pub fn batched(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            priority: WritePriority::Batched,
        }
    }

    pub fn critical(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            priority: WritePriority::Critical,
        }
    }
}

/// One iteration of the host render loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTick {
    pub index: u64,
    pub time_seconds: f64,
}

/// Frame source for hosts without their own frame callback.
#[derive(Debug, Default, Clone)]
pub struct FrameClock {
    next_index: u64,
    time_seconds: f64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.next_index = 0;
        self.time_seconds = 0.0;
    }

    /// Moves time forward and returns the next tick.
    pub fn advance(&mut self, delta_seconds: f64) -> FrameTick {
        self.time_seconds = (self.time_seconds + delta_seconds.max(0.0)).max(0.0);
        let tick = FrameTick {
            index: self.next_index,
            time_seconds: self.time_seconds,
        };
        self.next_index += 1;
        tick
    }
}

/// Outcome of a single flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    pub frame: Option<u64>,
    pub applied: usize,
    pub deferred: usize,
    pub estimated_cost: Duration,
    /// Set when the frame had already been flushed and nothing ran.
    pub skipped: bool,
}

impl FlushReport {
    pub fn budget_exceeded(&self) -> bool {
        self.deferred > 0
    }

    /// The recovered budget condition, for diagnostics.
    pub fn as_error(&self) -> Option<PaletteError> {
        self.budget_exceeded()
            .then_some(PaletteError::SchedulerBudgetExceeded {
                deferred: self.deferred,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SchedulerStats {
    pub critical_writes: usize,
    pub batched_applied: usize,
    pub coalesced: usize,
    pub flushes: usize,
    pub deferred_flushes: usize,
}

#[derive(Debug, Clone)]
struct PendingWrite {
    value: String,
    seq: u64,
}

#[derive(Debug)]
pub struct VariableBatchScheduler<S: VariableSurface> {
    surface: S,
    config: SchedulerConfig,
    budget: Duration,
    pending: HashMap<String, PendingWrite>,
    next_seq: u64,
    current_frame: Option<u64>,
    flushed_frame: Option<u64>,
    stats: SchedulerStats,
}

impl<S: VariableSurface> VariableBatchScheduler<S> {
    pub fn new(surface: S, config: SchedulerConfig, tier: QualityTier) -> Self {
        let budget = config.budget_for(tier);
        Self {
            surface,
            config,
            budget,
            pending: HashMap::new(),
            next_seq: 0,
            current_frame: None,
            flushed_frame: None,
            stats: SchedulerStats::default(),
        }
    }

    /// Switches the frame budget to the one configured for `tier`.
    pub fn set_tier(&mut self, tier: QualityTier) {
        self.budget = self.config.budget_for(tier);
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn submit(&mut self, write: VariableWrite) {
        self.enqueue(write.name, write.value, write.priority);
    }

    pub fn enqueue(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        priority: WritePriority,
    ) {
        let name = name.into();
        let value = value.into();

        match priority {
            WritePriority::Critical => {
                // A queued value for the same name is older; drop it so it
                // cannot land after this one.
                if self.pending.remove(&name).is_some() {
                    self.stats.coalesced += 1;
                }
                self.surface.set_variable(&name, &value);
                self.stats.critical_writes += 1;
            }
            WritePriority::Batched => {
                if let Some(existing) = self.pending.get_mut(&name) {
                    existing.value = value;
                    self.stats.coalesced += 1;
                } else {
                    self.pending.insert(
                        name,
                        PendingWrite {
                            value,
                            seq: self.next_seq,
                        },
                    );
                    self.next_seq += 1;
                }
            }
        }
    }

    /// Marks the start of a frame and runs its flush.
    pub fn on_frame(&mut self, tick: FrameTick) -> FlushReport {
        self.current_frame = Some(tick.index);
        self.flush()
    }

    /// Applies pending batched writes within the frame budget. Runs at most
    /// once per frame; a second call in the same frame is skipped.
    pub fn flush(&mut self) -> FlushReport {
        if self.current_frame.is_some() && self.flushed_frame == self.current_frame {
            return FlushReport {
                frame: self.current_frame,
                deferred: self.pending.len(),
                skipped: true,
                ..FlushReport::default()
            };
        }
        self.flushed_frame = self.current_frame;

        if self.pending.is_empty() {
            return FlushReport {
                frame: self.current_frame,
                ..FlushReport::default()
            };
        }

        let mut order: Vec<(u64, String)> = self
            .pending
            .iter()
            .map(|(name, write)| (write.seq, name.clone()))
            .collect();
        order.sort_unstable();

        let capacity = self.writes_per_frame();
        let mut applied = 0;
        for (_, name) in order.into_iter().take(capacity) {
            if let Some(write) = self.pending.remove(&name) {
                self.surface.set_variable(&name, &write.value);
                applied += 1;
            }
        }

        let report = FlushReport {
            frame: self.current_frame,
            applied,
            deferred: self.pending.len(),
            estimated_cost: self.config.write_cost() * applied as u32,
            skipped: false,
        };

        self.stats.flushes += 1;
        self.stats.batched_applied += applied;
        if report.budget_exceeded() {
            self.stats.deferred_flushes += 1;
            tracing::debug!(
                frame = ?report.frame,
                applied,
                deferred = report.deferred,
                budget_us = self.budget.as_micros() as u64,
                "frame budget reached; deferring writes"
            );
        }
        report
    }

    /// Writes that fit the budget; always at least one so a flush makes
    /// progress.
    fn writes_per_frame(&self) -> usize {
        let cost = self.config.write_cost().as_nanos();
        if cost == 0 {
            return usize::MAX;
        }
        ((self.budget.as_nanos() / cost) as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::MemorySurface;

    fn scheduler() -> VariableBatchScheduler<MemorySurface> {
        VariableBatchScheduler::new(
            MemorySurface::new(),
            SchedulerConfig::default(),
            QualityTier::Balanced,
        )
    }

    #[test]
    fn five_hundred_writes_drain_over_several_frames() {
        let mut scheduler = scheduler();
        assert_eq!(scheduler.budget(), Duration::from_millis(4));
        for i in 0..500 {
            scheduler.enqueue(format!("--var-{i}"), i.to_string(), WritePriority::Batched);
        }

        let mut clock = FrameClock::new();
        let first = scheduler.on_frame(clock.advance(1.0 / 60.0));
        assert!(first.budget_exceeded());
        assert!(first.estimated_cost <= scheduler.budget());
        assert!(first.as_error().is_some());

        let mut frames = 1;
        while !scheduler.is_idle() {
            let report = scheduler.on_frame(clock.advance(1.0 / 60.0));
            assert!(report.estimated_cost <= scheduler.budget());
            frames += 1;
            assert!(frames < 10);
        }

        let surface = scheduler.surface();
        assert_eq!(surface.total_writes(), 500);
        for i in 0..500 {
            assert_eq!(surface.write_count(&format!("--var-{i}")), 1);
            assert_eq!(surface.get(&format!("--var-{i}")), Some(i.to_string().as_str()));
        }
        assert_eq!(frames, 3);
        assert!(scheduler.stats().deferred_flushes >= 1);
    }

    #[test]
    fn oldest_writes_go_first() {
        let mut scheduler = VariableBatchScheduler::new(
            MemorySurface::new(),
            SchedulerConfig {
                balanced_budget_ms: 0.04,
                ..SchedulerConfig::default()
            },
            QualityTier::Balanced,
        );
        for name in ["--a", "--b", "--c"] {
            scheduler.enqueue(name, "x", WritePriority::Batched);
        }
        let report = scheduler.flush();
        assert_eq!(report.applied, 2);
        assert_eq!(scheduler.surface().get("--c"), None);
        scheduler.flush();
        assert_eq!(scheduler.surface().get("--c"), Some("x"));
    }

    #[test]
    fn batched_writes_coalesce_last_write_wins() {
        let mut scheduler = scheduler();
        scheduler.enqueue("--accent", "#000000", WritePriority::Batched);
        scheduler.enqueue("--accent", "#ffffff", WritePriority::Batched);
        assert_eq!(scheduler.pending_len(), 1);

        scheduler.flush();
        assert_eq!(scheduler.surface().get("--accent"), Some("#ffffff"));
        assert_eq!(scheduler.surface().write_count("--accent"), 1);
        assert_eq!(scheduler.stats().coalesced, 1);
    }

    #[test]
    fn critical_writes_bypass_batching() {
        let mut scheduler = scheduler();
        scheduler.enqueue("--pulse", "0.1", WritePriority::Batched);
        scheduler.submit(VariableWrite::critical("--pulse", "0.9"));

        assert_eq!(scheduler.surface().get("--pulse"), Some("0.9"));
        assert!(scheduler.is_idle());
        scheduler.flush();
        assert_eq!(scheduler.surface().get("--pulse"), Some("0.9"));
        assert_eq!(scheduler.stats().critical_writes, 1);
    }

    #[test]
    fn flushes_at_most_once_per_frame() {
        let mut scheduler = VariableBatchScheduler::new(
            MemorySurface::new(),
            SchedulerConfig {
                balanced_budget_ms: 0.02,
                ..SchedulerConfig::default()
            },
            QualityTier::Balanced,
        );
        scheduler.enqueue("--a", "1", WritePriority::Batched);
        scheduler.enqueue("--b", "2", WritePriority::Batched);

        let tick = FrameTick {
            index: 7,
            time_seconds: 0.0,
        };
        let first = scheduler.on_frame(tick);
        assert_eq!(first.applied, 1);
        let second = scheduler.flush();
        assert!(second.skipped);
        assert_eq!(second.applied, 0);
        assert_eq!(scheduler.pending_len(), 1);
    }

    #[test]
    fn zero_budget_still_makes_progress() {
        let mut scheduler = VariableBatchScheduler::new(
            MemorySurface::new(),
            SchedulerConfig::default(),
            QualityTier::Balanced,
        );
        scheduler.config.balanced_budget_ms = 0.0;
        scheduler.set_tier(QualityTier::Balanced);
        scheduler.enqueue("--a", "1", WritePriority::Batched);
        assert_eq!(scheduler.flush().applied, 1);
    }

    #[test]
    fn low_tier_gets_smaller_budget() {
        let mut scheduler = scheduler();
        let balanced = scheduler.budget();
        scheduler.set_tier(QualityTier::Low);
        assert!(scheduler.budget() < balanced);
    }

    #[test]
    fn clock_numbers_frames() {
        let mut clock = FrameClock::new();
        assert_eq!(clock.advance(0.5).index, 0);
        let tick = clock.advance(0.5);
        assert_eq!(tick.index, 1);
        assert!((tick.time_seconds - 1.0).abs() < 1e-12);
        clock.reset();
        assert_eq!(clock.advance(-1.0).time_seconds, 0.0);
    }
}
