//! Countdown timer.
//!
//! The countdown is derived from wall-clock timestamps rather than a
//! suspendable clock. Pausing records how much time had elapsed; resuming
//! shifts the start forward by the length of the pause, so time spent paused
//! never counts against the countdown.

use chrono::{DateTime, Utc};

/// Raw countdown state.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerState {
    pub duration_seconds: f64,

    /// When play began, shifted forward by every completed pause
    pub started_at: Option<DateTime<Utc>>,

    /// Elapsed seconds at the moment of pausing. Only read by
    /// [`TimerController::resume_compensate`].
    paused_elapsed_seconds: Option<f64>,
}

impl TimerState {
    pub fn new(duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            started_at: None,
            paused_elapsed_seconds: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_elapsed_seconds.is_some()
    }
}

/// Read-only view of the timer at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerSnapshot {
    pub duration_seconds: f64,
    pub remaining_seconds: f64,
}

impl TimerSnapshot {
    pub fn has_expired(&self) -> bool {
        self.remaining_seconds <= 0.0
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

fn seconds_to_duration(seconds: f64) -> chrono::Duration {
    chrono::Duration::microseconds((seconds * 1_000_000.0).round() as i64)
}

/// Owns the countdown.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerController {
    state: TimerState,
}

impl TimerController {
    pub fn new(duration_seconds: u32) -> Self {
        Self {
            state: TimerState::new(duration_seconds as f64),
        }
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn duration_seconds(&self) -> f64 {
        self.state.duration_seconds
    }

    pub fn is_running(&self) -> bool {
        self.state.started_at.is_some()
    }

    /// Change the countdown length. Only takes effect for the next start.
    pub fn set_duration(&mut self, duration_seconds: u32) {
        if self.state.started_at.is_none() {
            self.state.duration_seconds = duration_seconds as f64;
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.state.started_at = Some(now);
        self.state.paused_elapsed_seconds = None;
        tracing::debug!(duration = self.state.duration_seconds, "timer started");
    }

    pub fn stop(&mut self) {
        self.state.started_at = None;
        self.state.paused_elapsed_seconds = None;
    }

    /// Seconds elapsed in play as of `now`.
    pub fn elapsed(&self, now: DateTime<Utc>) -> f64 {
        match self.state.started_at {
            Some(started) => seconds_between(started, now),
            None => 0.0,
        }
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> f64 {
        match self.state.started_at {
            None => self.state.duration_seconds,
            Some(_) => (self.state.duration_seconds - self.elapsed(now)).max(0.0),
        }
    }

    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_running() && self.remaining(now) <= 0.0
    }

    /// Record elapsed time at the moment of pausing.
    pub fn pause_snapshot(&mut self, now: DateTime<Utc>) {
        if self.state.started_at.is_none() {
            return;
        }
        let elapsed = self.elapsed(now);
        self.state.paused_elapsed_seconds = Some(elapsed);
        tracing::debug!(elapsed, "timer paused");
    }

    /// Shift the start forward by the pause gap and clear the snapshot.
    pub fn resume_compensate(&mut self, now: DateTime<Utc>) {
        let (Some(started), Some(paused_elapsed)) = (
            self.state.started_at,
            self.state.paused_elapsed_seconds.take(),
        ) else {
            tracing::warn!("resume without a pause snapshot; timer left unchanged");
            return;
        };

        let paused_at = started + seconds_to_duration(paused_elapsed);
        let gap = now - paused_at;
        self.state.started_at = Some(started + gap);
        tracing::debug!(gap_ms = gap.num_milliseconds(), "timer resumed");
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> TimerSnapshot {
        TimerSnapshot {
            duration_seconds: self.state.duration_seconds,
            remaining_seconds: self.remaining(now),
        }
    }
}
