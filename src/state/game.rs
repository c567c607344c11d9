//! Game state machine.
//!
//! Owns the discrete play state and drives the countdown timer.
//!
//! # State Diagram
//!
//! ```text
//!  ┌──────┐  start   ┌─────────┐  pause   ┌───────────────┐  settle  ┌────────┐
//!  │ Menu │─────────▶│ Playing │─────────▶│ Transitioning │─────────▶│ Paused │
//!  └──────┘          └────┬────┘          └───────────────┘          └───┬────┘
//!     ▲                   │  ▲                                            │
//!     │                   │  │   settle   ┌───────────────┐    resume    │
//!     │                   │  └────────────│ Transitioning │◀─────────────┘
//!     │ restart           │               └───────────────┘
//!     │                   │ timer expired / engine game over
//!     │             ┌─────▼────┐
//!     └─────────────│ GameOver │
//!                   └──────────┘
//! ```
//!
//! Pause and resume requests arriving while `Transitioning` are dropped.

use std::fmt;

use chrono::{DateTime, Utc};

use super::reporter::ScoreSubmission;
use super::timer::TimerController;

/// Where a `Transitioning` state settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionTarget {
    Playing,
    Paused,
}

/// Discrete play state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameState {
    /// Start screen
    #[default]
    Menu,
    /// Countdown running, input live
    Playing,
    /// Countdown frozen
    Paused,
    /// Final screen; only restart is accepted
    GameOver,
    /// Settling after a pause or resume
    Transitioning {
        to: TransitionTarget,
        until: DateTime<Utc>,
    },
}

impl GameState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Menu => "menu",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::GameOver => "game_over",
            Self::Transitioning { .. } => "transitioning",
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::GameOver)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transitioning { to, .. } => write!(f, "Transitioning({:?})", to),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

impl From<TransitionTarget> for GameState {
    fn from(target: TransitionTarget) -> Self {
        match target {
            TransitionTarget::Playing => Self::Playing,
            TransitionTarget::Paused => Self::Paused,
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// Player pressed start
    Start,
    /// Player pressed pause
    Pause,
    /// The host backgrounded the game
    HostPause,
    /// Player pressed resume
    Resume,
    /// The block engine ended the game early (board overflow)
    EngineGameOver { score: u64 },
    /// Player left the final screen
    Restart,
}

/// Error when a transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: GameState,
    pub event: GameEvent,
    pub reason: &'static str,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid transition from {} via {:?}: {}",
            self.from, self.event, self.reason
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// What an event or tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed { from: GameState, to: GameState },
    /// Dropped input (re-entrant pause, input while settling, no-op tick)
    Ignored,
    /// The game ended; the submission is ready to report
    GameOver(ScoreSubmission),
}

/// Owns the current [`GameState`] and the countdown it drives.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    state: GameState,
    timer: TimerController,
    transition_delay: chrono::Duration,
    allow_unreported_play: bool,
}

impl GameStateMachine {
    pub fn new(
        timer_seconds: u32,
        transition_delay: chrono::Duration,
        allow_unreported_play: bool,
    ) -> Self {
        Self {
            state: GameState::Menu,
            timer: TimerController::new(timer_seconds),
            transition_delay,
            allow_unreported_play,
        }
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn timer(&self) -> &TimerController {
        &self.timer
    }

    /// Countdown length for the next game. Ignored outside the menu.
    pub fn set_timer_duration(&mut self, seconds: u32) {
        if self.state == GameState::Menu {
            self.timer.set_duration(seconds);
        }
    }

    /// Apply an input event at `now`.
    pub fn apply(
        &mut self,
        event: GameEvent,
        now: DateTime<Utc>,
        session_ready: bool,
    ) -> Result<Transition, InvalidTransition> {
        use GameEvent::*;
        use GameState::*;

        let from = self.state;
        let invalid = |reason: &'static str| InvalidTransition {
            from,
            event,
            reason,
        };

        let to = match (self.state, event) {
            // Start: Menu -> Playing
            (Menu, Start) => {
                if !session_ready && !self.allow_unreported_play {
                    return Err(invalid("No usable session"));
                }
                if !session_ready {
                    tracing::info!("starting without a session; score will not be reported");
                }
                self.timer.start(now);
                Playing
            }
            (GameOver, Start) => return Err(invalid("Must restart first")),
            (_, Start) => return Err(invalid("Already in a game")),

            // Pause: Playing -> Transitioning -> Paused
            (Playing, Pause | HostPause) => {
                self.timer.pause_snapshot(now);
                Transitioning {
                    to: TransitionTarget::Paused,
                    until: now + self.transition_delay,
                }
            }
            (Paused | Transitioning { .. }, Pause | HostPause) => return Ok(Transition::Ignored),
            (_, Pause | HostPause) => return Err(invalid("Not playing")),

            // Resume: Paused -> Transitioning -> Playing
            (Paused, Resume) => {
                self.timer.resume_compensate(now);
                Transitioning {
                    to: TransitionTarget::Playing,
                    until: now + self.transition_delay,
                }
            }
            (Playing | Transitioning { .. }, Resume) => return Ok(Transition::Ignored),
            (_, Resume) => return Err(invalid("Not paused")),

            // EngineGameOver: Playing -> GameOver
            (Playing, EngineGameOver { score })
            | (
                Transitioning {
                    to: TransitionTarget::Playing,
                    ..
                },
                EngineGameOver { score },
            ) => return Ok(self.finish(now, score, "engine")),
            (_, EngineGameOver { .. }) => return Err(invalid("Not playing")),

            // Restart: GameOver -> Menu
            (GameOver, Restart) => {
                self.timer.stop();
                Menu
            }
            (_, Restart) => return Err(invalid("Game not over")),
        };

        self.state = to;
        tracing::debug!(%from, %to, ?event, "game state changed");
        Ok(Transition::Changed { from, to })
    }

    /// Per-frame update. Settles `Transitioning` and samples expiry using the
    /// same `now`; `score` is the engine's current score.
    pub fn tick(&mut self, now: DateTime<Utc>, score: u64) -> Transition {
        let from = self.state;

        if let GameState::Transitioning { to, until } = self.state {
            if now >= until {
                self.state = to.into();
                tracing::debug!(%from, to = %self.state, "transition settled");
            }
        }

        if self.state.is_playing() && self.timer.has_expired(now) {
            return self.finish(now, score, "timer");
        }

        if self.state != from {
            Transition::Changed {
                from,
                to: self.state,
            }
        } else {
            Transition::Ignored
        }
    }

    fn finish(&mut self, now: DateTime<Utc>, score: u64, cause: &'static str) -> Transition {
        let snapshot = self.timer.snapshot(now);
        self.timer.stop();
        self.state = GameState::GameOver;

        let submission = ScoreSubmission::from_timer(score, &snapshot);
        tracing::info!(
            cause,
            score,
            time = submission.time_seconds,
            "game over"
        );
        Transition::GameOver(submission)
    }
}
