//! Runtime control layer for Hexfall.
//!
//! This module provides the components that sit between the host
//! application and the block engine:
//!
//! - `source` - Where session parameters come from (injected, query, message)
//! - `session` - Session identity, readiness and polling
//! - `timer` - Wall-clock countdown with pause compensation
//! - `game` - Play state machine
//! - `reporter` - Final score submission and host notification
//! - `host` - Outbound host transport (parent frame or native bridge)
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                             GameRuntime                               │
//! │                                                                       │
//! │  ┌───────────────┐  ready   ┌──────────────────┐  game over           │
//! │  │SessionManager │─────────▶│ GameStateMachine │──────────────┐       │
//! │  │               │          │                  │              ▼       │
//! │  │ SessionSource │          │ TimerController  │      ┌──────────────┐│
//! │  │  injected     │          └──────────────────┘      │ ScoreReporter││
//! │  │  query        │                  ▲                 │              ││
//! │  │  message      │                  │ tick(now)       │  ScoreApi    ││
//! │  └───────┬───────┘                  │                 └──────┬───────┘│
//! │          │                     frame driver                  │        │
//! │          ▼                                                   ▼        │
//! │   requestSessionParams ──────────▶ HostTransport ◀──── scoreSubmit*   │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut runtime = GameRuntime::new(config, source, host, api, clock);
//! runtime.wait_for_session(&mut host_events).await;
//!
//! let _ = runtime.handle(GameEvent::Start)?;
//! // every animation frame:
//! if let Some(report) = runtime.frame(engine.score()).report {
//!     tokio::spawn(report);
//! }
//! ```

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod game;
pub mod host;
pub mod reporter;
pub mod session;
pub mod source;
pub mod timer;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

// Re-export commonly used types
pub use api::{ApiResponse, HttpScoreApi, ScoreApi, SubmitBody, SubmitRequest};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RuntimeConfig;
pub use error::{ApiError, ConfigError, HostError, SessionError};
pub use game::{
    GameEvent, GameState, GameStateMachine, InvalidTransition, Transition, TransitionTarget,
};
pub use host::{
    select_transport, FrameTransport, HostTransport, NativeBridgeTransport, Notification,
    OutboundMessage, RecordingTransport, SubmitFailure, SubmitSuccess,
};
pub use reporter::{time_taken, ReportOutcome, ScoreReporter, ScoreSubmission};
pub use session::{HostEvent, Readiness, Session, SessionManager};
pub use source::{
    EnvironmentSource, InboundMessage, InjectedConfig, InjectionHandle, QueryParams,
    SessionFields, SessionSource,
};
pub use timer::{TimerController, TimerSnapshot, TimerState};

/// A score submission in flight. It owns snapshots of everything it needs.
pub type PendingReport = Pin<Box<dyn Future<Output = ReportOutcome> + Send + 'static>>;

/// Result of one input event or frame.
#[must_use = "dropping a Step drops its pending score report"]
pub struct Step {
    pub transition: Transition,
    /// Set on the step that entered `GameOver`
    pub report: Option<PendingReport>,
}

impl Step {
    fn from_transition(transition: Transition, report: Option<PendingReport>) -> Self {
        Self { transition, report }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("transition", &self.transition)
            .field("report", &self.report.is_some())
            .finish()
    }
}

/// Combined runtime.
///
/// Wires the components together and samples the clock once per call, so
/// every decision made during one event or frame sees the same `now`.
pub struct GameRuntime {
    pub sessions: SessionManager,
    pub game: GameStateMachine,
    pub reporter: ScoreReporter,
    clock: Arc<dyn Clock>,
    config: RuntimeConfig,
}

impl GameRuntime {
    pub fn new(
        config: RuntimeConfig,
        source: Box<dyn SessionSource>,
        host: Arc<dyn HostTransport>,
        api: Arc<dyn ScoreApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = SessionManager::new(source, Arc::clone(&host), config.clone());
        let game = GameStateMachine::new(
            config.default_timer_seconds,
            config.transition_delay_chrono(),
            config.allow_unreported_play,
        );
        let reporter = ScoreReporter::new(api, host);
        Self {
            sessions,
            game,
            reporter,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn state(&self) -> GameState {
        self.game.state()
    }

    /// Seconds left on the countdown, for the HUD.
    pub fn remaining(&self) -> f64 {
        self.game.timer().remaining(self.clock.now())
    }

    /// Whether the start control should be offered.
    pub fn can_start(&self) -> bool {
        self.game.state() == GameState::Menu
            && (self.sessions.is_ready() || self.config.allow_unreported_play)
    }

    pub fn poll_session(&mut self) -> Readiness {
        self.sessions.poll(self.clock.now())
    }

    /// Poll until a usable session arrives.
    pub async fn wait_for_session(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<HostEvent>,
    ) -> Readiness {
        let clock = Arc::clone(&self.clock);
        self.sessions.run_until_ready(clock.as_ref(), events).await
    }

    /// Merge a raw host message at any point in the game.
    pub fn handle_host_message(&mut self, raw: &str) -> Readiness {
        self.sessions.apply_raw_message(raw, self.clock.now())
    }

    /// Apply a player or host input.
    pub fn handle(&mut self, event: GameEvent) -> Result<Step, InvalidTransition> {
        let now = self.clock.now();
        let ready = self.sessions.session().is_usable(now);

        if event == GameEvent::Start && ready {
            self.game
                .set_timer_duration(self.sessions.session().timer_duration);
        }

        let transition = self.game.apply(event, now, ready)?;
        if event == GameEvent::Restart {
            self.reporter.reset();
        }
        let report = self.report_for(&transition, now);
        Ok(Step::from_transition(transition, report))
    }

    /// Per-frame update with the engine's current score.
    pub fn frame(&mut self, score: u64) -> Step {
        let now = self.clock.now();
        let transition = self.game.tick(now, score);
        let report = self.report_for(&transition, now);
        Step::from_transition(transition, report)
    }

    /// Player chose to leave from the final screen.
    pub fn close_game(&self) -> bool {
        self.reporter.close_game()
    }

    fn report_for(
        &self,
        transition: &Transition,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Option<PendingReport> {
        let Transition::GameOver(submission) = *transition else {
            return None;
        };
        let reporter = self.reporter.clone();
        let session = self.sessions.snapshot();
        Some(Box::pin(async move {
            reporter.submit(session, submission, now).await
        }))
    }
}

impl std::fmt::Debug for GameRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameRuntime")
            .field("sessions", &self.sessions)
            .field("game", &self.game)
            .field("reporter", &self.reporter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::reporter::tests::FakeApi;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    struct Harness {
        runtime: GameRuntime,
        clock: ManualClock,
        api: FakeApi,
        host: RecordingTransport,
    }

    fn harness(url: &str, api: FakeApi) -> Harness {
        let clock = ManualClock::new(t0());
        let host = RecordingTransport::new();
        let runtime = GameRuntime::new(
            RuntimeConfig::default(),
            Box::new(EnvironmentSource::from_url(url)),
            Arc::new(host.clone()),
            Arc::new(api.clone()),
            Arc::new(clock.clone()),
        );
        Harness {
            runtime,
            clock,
            api,
            host,
        }
    }

    impl Harness {
        /// Run frames every 16ms until `until_ms`, returning the first report.
        fn frames_until(&mut self, until_ms: i64, score: u64) -> Option<(i64, PendingReport)> {
            let mut found = None;
            while self.clock.now() < t0() + chrono::Duration::milliseconds(until_ms) {
                self.clock.advance(chrono::Duration::milliseconds(16));
                let step = self.runtime.frame(score);
                if let Some(report) = step.report {
                    assert!(found.is_none(), "game over reported twice");
                    let at = (self.clock.now() - t0()).num_milliseconds();
                    found = Some((at, report));
                }
            }
            found
        }

        fn at(&self, ms: i64) {
            self.clock.set(t0() + chrono::Duration::milliseconds(ms));
        }
    }

    #[tokio::test]
    async fn test_full_game_with_pause() {
        let mut h = harness(
            "?poolId=p&sessionId=s&authToken=t",
            FakeApi::replying(200, r#"{"saved": true}"#),
        );
        assert!(h.runtime.poll_session().is_ready());
        assert!(h.runtime.can_start());

        let _ = h.runtime.handle(GameEvent::Start).unwrap();
        assert!(h.frames_until(5_000, 7).is_none());

        h.at(5_000);
        let _ = h.runtime.handle(GameEvent::HostPause).unwrap();
        assert!(h.frames_until(8_000, 7).is_none());
        assert_eq!(h.runtime.state(), GameState::Paused);

        h.at(8_000);
        let _ = h.runtime.handle(GameEvent::Resume).unwrap();
        let (at, report) = h.frames_until(20_000, 7).expect("game should end");
        assert_eq!(at, 18_000);

        let outcome = report.await;
        assert_eq!(
            outcome,
            ReportOutcome::Submitted {
                response: serde_json::json!({"saved": true})
            }
        );
        assert_eq!(h.api.calls(), 1);
        assert_eq!(
            h.api.requests.lock()[0].body,
            SubmitBody { score: 7, time: 15 }
        );
        assert_eq!(h.host.count("onMessage"), 1);

        assert!(h.runtime.close_game());
        assert_eq!(h.host.count("closeGame"), 1);
    }

    #[tokio::test]
    async fn test_play_without_session_skips_report() {
        let mut h = harness("", FakeApi::replying(200, "{}"));
        assert!(!h.runtime.poll_session().is_ready());
        assert!(h.runtime.can_start());

        let _ = h.runtime.handle(GameEvent::Start).unwrap();
        h.at(3_000);
        let step = h
            .runtime
            .handle(GameEvent::EngineGameOver { score: 12 })
            .unwrap();
        assert_eq!(
            step.transition,
            Transition::GameOver(ScoreSubmission {
                score: 12,
                time_seconds: 3
            })
        );

        let outcome = step.report.expect("report pending").await;
        assert_eq!(outcome, ReportOutcome::Skipped);
        assert_eq!(h.api.calls(), 0);
        assert!(h.runtime.reporter.is_ready_to_exit());
    }

    #[tokio::test]
    async fn test_in_flight_report_uses_snapshot() {
        let mut h = harness("?poolId=p&sessionId=s&authToken=t", FakeApi::replying(200, ""));
        h.runtime.poll_session();
        let _ = h.runtime.handle(GameEvent::Start).unwrap();
        h.at(2_000);
        let step = h
            .runtime
            .handle(GameEvent::EngineGameOver { score: 1 })
            .unwrap();

        // A late message changes the live session before the request runs.
        h.runtime
            .handle_host_message(r#"{"type":"flutterParams","sessionId":"other"}"#);
        step.report.unwrap().await;

        assert!(h.api.requests.lock()[0].url.contains("/sessions/s/"));
    }

    #[tokio::test]
    async fn test_restart_clears_exit_latch_and_uses_session_timer() {
        let mut h = harness(
            "?sessionId=s&authToken=t&timer=30",
            FakeApi::replying(500, "boom"),
        );
        h.runtime.poll_session();
        let _ = h.runtime.handle(GameEvent::Start).unwrap();
        assert_eq!(h.runtime.remaining(), 30.0);

        let (at, report) = h.frames_until(40_000, 0).unwrap();
        assert_eq!(at, 30_000);
        assert!(matches!(
            report.await,
            ReportOutcome::Rejected { status: 500, .. }
        ));
        assert!(h.runtime.reporter.is_ready_to_exit());

        let _ = h.runtime.handle(GameEvent::Restart).unwrap();
        assert_eq!(h.runtime.state(), GameState::Menu);
        assert!(!h.runtime.reporter.is_ready_to_exit());
        assert!(!h.runtime.close_game());
    }

    #[tokio::test]
    async fn test_rejected_restart_keeps_exit_latch() {
        let mut h = harness("?sessionId=s&authToken=t", FakeApi::replying(200, "{}"));
        h.runtime.poll_session();
        let _ = h.runtime.handle(GameEvent::Start).unwrap();
        h.at(1_000);
        let step = h
            .runtime
            .handle(GameEvent::EngineGameOver { score: 3 })
            .unwrap();

        // The report settles only after the player is back in the menu.
        let _ = h.runtime.handle(GameEvent::Restart).unwrap();
        step.report.expect("report pending").await;
        assert!(h.runtime.reporter.is_ready_to_exit());

        let err = h.runtime.handle(GameEvent::Restart).unwrap_err();
        assert_eq!(err.from, GameState::Menu);
        assert!(h.runtime.reporter.is_ready_to_exit());
    }
}
