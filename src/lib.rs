//! Hexfall Runtime Library
//!
//! This crate provides the runtime control layer of the Hexfall arcade game
//! when it runs embedded in a host application.
//!
//! # Overview
//!
//! The state module provides:
//!
//! - **Session Acquisition** - Resolves the play session from an injected
//!   config object, the query string, or a host message, polling until the
//!   host has provided one.
//!
//! - **Game State Machine** - Menu, playing, paused, game over, with a short
//!   settle window after pause and resume.
//!
//! - **Countdown Timer** - Wall-clock countdown that excludes time spent
//!   paused.
//!
//! - **Score Reporting** - Posts the final score once and tells the host how
//!   it went.
//!
//! # Design Principles
//!
//! 1. **One `now` per decision** - Components never read the clock. The
//!    runtime samples it once per event or frame.
//!
//! 2. **Owned state, snapshot reads** - Each component owns its state; work
//!    that outlives a call takes a snapshot.
//!
//! 3. **Nothing is fatal** - A missing session, an HTTP error or a dead
//!    network degrade to "score not recorded", and the host is told.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use hexfall_runtime::state::{
//!     EnvironmentSource, GameEvent, GameRuntime, GameState, ManualClock, RecordingTransport,
//!     RuntimeConfig, HttpScoreApi,
//! };
//!
//! let clock = ManualClock::new(chrono::Utc::now());
//! let config = RuntimeConfig::default();
//! let api = HttpScoreApi::new(config.request_timeout).unwrap();
//!
//! let mut runtime = GameRuntime::new(
//!     config,
//!     Box::new(EnvironmentSource::from_url("?sessionId=s&authToken=t&timer=20")),
//!     Arc::new(RecordingTransport::new()),
//!     Arc::new(api),
//!     Arc::new(clock.clone()),
//! );
//!
//! assert!(runtime.poll_session().is_ready());
//! let _ = runtime.handle(GameEvent::Start).unwrap();
//! assert_eq!(runtime.state(), GameState::Playing);
//! assert_eq!(runtime.remaining(), 20.0);
//! ```

pub mod state;

// Re-export everything from state module at crate root
pub use state::*;
