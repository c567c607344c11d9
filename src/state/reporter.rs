//! Score reporting.
//!
//! At game over the final score and elapsed play time are posted to the
//! score API once. Whatever happens, the host hears about it and the local
//! UI reaches its ready-to-exit state exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use super::api::{ScoreApi, SubmitBody, SubmitRequest};
use super::host::{
    send_logged, HostTransport, Notification, OutboundMessage, SubmitFailure, SubmitSuccess,
};
use super::session::Session;
use super::timer::TimerSnapshot;

/// Final result of one game, built once at game over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreSubmission {
    pub score: u64,
    /// Whole seconds, within `[1, duration]`
    pub time_seconds: u32,
}

impl ScoreSubmission {
    pub fn from_timer(score: u64, timer: &TimerSnapshot) -> Self {
        Self {
            score,
            time_seconds: time_taken(timer.duration_seconds, timer.remaining_seconds),
        }
    }
}

/// Seconds spent playing, rounded up and clamped to `[1, duration]`.
///
/// A timer that ran out counts as the full duration; an early game over
/// counts `duration - remaining`.
pub fn time_taken(duration_seconds: f64, remaining_seconds: f64) -> u32 {
    let upper = if duration_seconds.is_finite() {
        duration_seconds.ceil().max(1.0)
    } else {
        1.0
    };
    let raw = if remaining_seconds > 0.0 {
        duration_seconds - remaining_seconds
    } else {
        duration_seconds
    };
    let raw = if raw.is_finite() { raw.ceil() } else { 1.0 };
    raw.clamp(1.0, upper) as u32
}

/// How a submission ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// The API accepted the score
    Submitted { response: serde_json::Value },
    /// The API answered with an error status or an unreadable body
    Rejected { status: u16, error: serde_json::Value },
    /// No response arrived
    NetworkFailed { message: String },
    /// No usable session; nothing was sent
    Skipped,
}

/// Submits scores and notifies the host.
#[derive(Clone)]
pub struct ScoreReporter {
    api: Arc<dyn ScoreApi>,
    host: Arc<dyn HostTransport>,
    ready_to_exit: Arc<AtomicBool>,
}

impl std::fmt::Debug for ScoreReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoreReporter")
            .field("ready_to_exit", &self.is_ready_to_exit())
            .finish()
    }
}

impl ScoreReporter {
    pub fn new(api: Arc<dyn ScoreApi>, host: Arc<dyn HostTransport>) -> Self {
        Self {
            api,
            host,
            ready_to_exit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the final screen may offer the exit action.
    pub fn is_ready_to_exit(&self) -> bool {
        self.ready_to_exit.load(Ordering::SeqCst)
    }

    /// Clear the exit latch for a new game.
    pub fn reset(&self) {
        self.ready_to_exit.store(false, Ordering::SeqCst);
    }

    /// Tell the host the player is leaving. Only valid once the final
    /// screen is ready to exit.
    pub fn close_game(&self) -> bool {
        if !self.is_ready_to_exit() {
            tracing::debug!("close requested before the final screen was ready");
            return false;
        }
        send_logged(self.host.as_ref(), &OutboundMessage::CloseGame)
    }

    /// Submit one game's score. `session` is a snapshot: later changes to
    /// the live session do not affect an in-flight submission.
    pub async fn submit(
        &self,
        session: Session,
        submission: ScoreSubmission,
        now: DateTime<Utc>,
    ) -> ReportOutcome {
        let ScoreSubmission {
            score,
            time_seconds: time,
        } = submission;

        if !session.is_usable(now) {
            tracing::info!(score, time, "no usable session; score not submitted");
            self.notify(Notification::ScoreSubmitError(SubmitFailure {
                status: 0,
                error: json!({"message": "no usable session; score not submitted", "skipped": true}),
                score,
                time,
            }));
            return ReportOutcome::Skipped;
        }

        let request = SubmitRequest {
            url: session.submit_url(),
            auth_token: session.auth_token.clone(),
            body: SubmitBody { score, time },
        };
        tracing::info!(url = %request.url, score, time, "submitting score");

        let outcome = match self.api.submit(&request).await {
            Ok(response) => {
                let parsed = if response.body.trim().is_empty() {
                    Ok(serde_json::Value::Null)
                } else {
                    serde_json::from_str::<serde_json::Value>(&response.body)
                };
                match (response.is_success(), parsed) {
                    (true, Ok(body)) => ReportOutcome::Submitted { response: body },
                    (true, Err(e)) => ReportOutcome::Rejected {
                        status: response.status,
                        error: json!({
                            "message": format!("malformed response: {}", e),
                            "body": response.body,
                        }),
                    },
                    (false, Ok(body)) if !body.is_null() => ReportOutcome::Rejected {
                        status: response.status,
                        error: body,
                    },
                    (false, _) => ReportOutcome::Rejected {
                        status: response.status,
                        error: json!({"message": response.body}),
                    },
                }
            }
            Err(e) => ReportOutcome::NetworkFailed {
                message: e.to_string(),
            },
        };

        match &outcome {
            ReportOutcome::Submitted { response } => {
                tracing::info!(score, time, "score submitted");
                self.notify(Notification::ScoreSubmitSuccess(SubmitSuccess {
                    score,
                    time,
                    response: response.clone(),
                }));
            }
            ReportOutcome::Rejected { status, error } => {
                tracing::warn!(status, %error, "score submission rejected");
                self.notify(Notification::ScoreSubmitError(SubmitFailure {
                    status: *status,
                    error: error.clone(),
                    score,
                    time,
                }));
            }
            ReportOutcome::NetworkFailed { message } => {
                tracing::warn!(error = %message, "score submission failed");
                self.notify(Notification::ScoreSubmitError(SubmitFailure {
                    status: 0,
                    error: json!({"message": message}),
                    score,
                    time,
                }));
            }
            ReportOutcome::Skipped => {}
        }

        outcome
    }

    fn notify(&self, notification: Notification) {
        send_logged(
            self.host.as_ref(),
            &OutboundMessage::OnMessage { data: notification },
        );
        if !self.ready_to_exit.swap(true, Ordering::SeqCst) {
            tracing::debug!("final screen ready to exit");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::state::api::ApiResponse;
    use crate::state::config::RuntimeConfig;
    use crate::state::error::ApiError;
    use crate::state::host::RecordingTransport;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    /// Canned API that records every request.
    #[derive(Clone)]
    pub(crate) struct FakeApi {
        pub requests: Arc<Mutex<Vec<SubmitRequest>>>,
        reply: Arc<dyn Fn() -> Result<ApiResponse, ApiError> + Send + Sync>,
    }

    impl FakeApi {
        pub(crate) fn replying(status: u16, body: &str) -> Self {
            let body = body.to_string();
            Self {
                requests: Arc::new(Mutex::new(Vec::new())),
                reply: Arc::new(move || {
                    Ok(ApiResponse {
                        status,
                        body: body.clone(),
                    })
                }),
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            let message = message.to_string();
            Self {
                requests: Arc::new(Mutex::new(Vec::new())),
                reply: Arc::new(move || Err(ApiError::Transport(message.clone()))),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl ScoreApi for FakeApi {
        async fn submit(&self, request: &SubmitRequest) -> Result<ApiResponse, ApiError> {
            self.requests.lock().push(request.clone());
            (self.reply)()
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn session() -> Session {
        Session {
            pool_id: "pool-1".into(),
            session_id: "sess-1".into(),
            auth_token: "tok".into(),
            ..Session::empty(&RuntimeConfig::default())
        }
    }

    fn reporter(api: &FakeApi) -> (ScoreReporter, RecordingTransport) {
        let host = RecordingTransport::new();
        let reporter = ScoreReporter::new(Arc::new(api.clone()), Arc::new(host.clone()));
        (reporter, host)
    }

    fn only_notification(host: &RecordingTransport) -> Notification {
        let sent = host.sent();
        assert_eq!(sent.len(), 1, "expected exactly one host message");
        match &sent[0] {
            OutboundMessage::OnMessage { data } => data.clone(),
            other => panic!("unexpected host message {:?}", other),
        }
    }

    const SUBMISSION: ScoreSubmission = ScoreSubmission {
        score: 420,
        time_seconds: 9,
    };

    #[test]
    fn test_time_taken_bounds() {
        // Ran out: full duration
        assert_eq!(time_taken(15.0, 0.0), 15);
        // Early end rounds up
        assert_eq!(time_taken(15.0, 6.2), 9);
        // Instant game over still reports a second
        assert_eq!(time_taken(15.0, 15.0), 1);
        assert_eq!(time_taken(15.0, 14.9999), 1);
        // Garbage inputs stay in range
        assert_eq!(time_taken(15.0, 40.0), 1);
        assert_eq!(time_taken(15.0, -3.0), 15);
        assert_eq!(time_taken(15.0, f64::NAN), 15);
        assert_eq!(time_taken(0.0, 0.0), 1);
    }

    #[test]
    fn test_submission_from_timer() {
        let snapshot = TimerSnapshot {
            duration_seconds: 15.0,
            remaining_seconds: 4.5,
        };
        assert_eq!(
            ScoreSubmission::from_timer(7, &snapshot),
            ScoreSubmission {
                score: 7,
                time_seconds: 11
            }
        );
    }

    #[tokio::test]
    async fn test_success() {
        let api = FakeApi::replying(200, r#"{"rank": 3}"#);
        let (reporter, host) = reporter(&api);

        let outcome = reporter.submit(session(), SUBMISSION, now()).await;
        assert_eq!(
            outcome,
            ReportOutcome::Submitted {
                response: json!({"rank": 3})
            }
        );

        let request = api.requests.lock()[0].clone();
        assert_eq!(
            request.url,
            "https://api.hexfall.game/api/v1/game-pools/pool-1/sessions/sess-1/submit-score"
        );
        assert_eq!(request.auth_token, "tok");
        assert_eq!(request.body, SubmitBody { score: 420, time: 9 });

        assert_eq!(
            only_notification(&host),
            Notification::ScoreSubmitSuccess(SubmitSuccess {
                score: 420,
                time: 9,
                response: json!({"rank": 3}),
            })
        );
        assert!(reporter.is_ready_to_exit());
    }

    #[tokio::test]
    async fn test_empty_identity_never_calls_api() {
        let api = FakeApi::replying(200, "{}");
        let (reporter, host) = reporter(&api);
        let empty = Session::empty(&RuntimeConfig::default());

        let outcome = reporter.submit(empty, SUBMISSION, now()).await;
        assert_eq!(outcome, ReportOutcome::Skipped);
        assert_eq!(api.calls(), 0);
        assert!(matches!(
            only_notification(&host),
            Notification::ScoreSubmitError(SubmitFailure { status: 0, .. })
        ));
        assert!(reporter.is_ready_to_exit());
    }

    #[tokio::test]
    async fn test_expired_session_skipped() {
        let api = FakeApi::replying(200, "{}");
        let (reporter, _) = reporter(&api);
        let expired = Session {
            expires_at: Some(now() - chrono::Duration::seconds(1)),
            ..session()
        };
        assert_eq!(
            reporter.submit(expired, SUBMISSION, now()).await,
            ReportOutcome::Skipped
        );
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn test_http_500_non_json() {
        let api = FakeApi::replying(500, "<html>Internal Server Error</html>");
        let (reporter, host) = reporter(&api);

        let outcome = reporter.submit(session(), SUBMISSION, now()).await;
        let expected_error = json!({"message": "<html>Internal Server Error</html>"});
        assert_eq!(
            outcome,
            ReportOutcome::Rejected {
                status: 500,
                error: expected_error.clone()
            }
        );
        assert_eq!(
            only_notification(&host),
            Notification::ScoreSubmitError(SubmitFailure {
                status: 500,
                error: expected_error,
                score: 420,
                time: 9,
            })
        );
        assert!(reporter.is_ready_to_exit());
    }

    #[tokio::test]
    async fn test_http_error_with_json_body() {
        let api = FakeApi::replying(409, r#"{"error": "already submitted"}"#);
        let (reporter, _) = reporter(&api);
        assert_eq!(
            reporter.submit(session(), SUBMISSION, now()).await,
            ReportOutcome::Rejected {
                status: 409,
                error: json!({"error": "already submitted"})
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_error() {
        let api = FakeApi::replying(200, "ok!");
        let (reporter, host) = reporter(&api);
        let outcome = reporter.submit(session(), SUBMISSION, now()).await;
        assert!(matches!(outcome, ReportOutcome::Rejected { status: 200, .. }));
        assert!(matches!(
            only_notification(&host),
            Notification::ScoreSubmitError(_)
        ));
    }

    #[tokio::test]
    async fn test_network_failure_reports_status_zero() {
        let api = FakeApi::failing("connection refused");
        let (reporter, host) = reporter(&api);
        let outcome = reporter.submit(session(), SUBMISSION, now()).await;
        assert!(matches!(outcome, ReportOutcome::NetworkFailed { .. }));
        match only_notification(&host) {
            Notification::ScoreSubmitError(failure) => {
                assert_eq!(failure.status, 0);
                assert_eq!(
                    failure.error,
                    json!({"message": "request failed: connection refused"})
                );
            }
            other => panic!("unexpected notification {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_game_only_after_ready() {
        let api = FakeApi::replying(200, "");
        let (reporter, host) = reporter(&api);

        assert!(!reporter.close_game());
        assert_eq!(host.count("closeGame"), 0);

        reporter.submit(session(), SUBMISSION, now()).await;
        assert!(reporter.close_game());
        assert_eq!(host.count("closeGame"), 1);

        reporter.reset();
        assert!(!reporter.is_ready_to_exit());
    }
}
