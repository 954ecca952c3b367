//! NDJSON fix replay.
//!
//! Each non-empty line of a trace file is one `LocationFix` object. Lines
//! starting with `#` are comments. Replay rebases the recorded timestamps:
//! the first fix becomes due when the provider is created and later fixes
//! keep their relative offsets.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use car2x_core::{LocationFix, LocationProvider, Priority, Subscription, UpdateRequest};
use car2x_env::{cancel_pair, V2xContext};

/// Gap appended after the last fix when a single-fix trace loops.
const DEFAULT_STEP_MS: i64 = 1000;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Failed to read trace {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Trace contains no fixes")]
    Empty,
}

/// A recorded drive, ordered by time.
#[derive(Debug, Clone)]
pub struct Trace {
    fixes: Vec<LocationFix>,
    /// Milliseconds after the first fix
    offsets: Vec<i64>,
    /// Length of one pass when looping
    period_ms: i64,
}

impl Trace {
    pub fn parse(text: &str) -> Result<Self, TraceError> {
        let mut fixes = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fix: LocationFix = serde_json::from_str(line).map_err(|source| TraceError::Parse {
                line: index + 1,
                source,
            })?;
            fixes.push(fix);
        }
        Self::from_fixes(fixes)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TraceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let trace = Self::parse(&text)?;
        info!(
            path = %path.display(),
            fixes = trace.len(),
            span_ms = trace.offsets.last().copied().unwrap_or(0),
            "Loaded fix trace"
        );
        Ok(trace)
    }

    pub fn from_fixes(mut fixes: Vec<LocationFix>) -> Result<Self, TraceError> {
        if fixes.is_empty() {
            return Err(TraceError::Empty);
        }
        fixes.sort_by_key(|f| f.timestamp);

        let first = fixes[0].timestamp;
        let offsets: Vec<i64> = fixes.iter().map(|f| f.timestamp - first).collect();
        let span = offsets[offsets.len() - 1];
        let step = if fixes.len() > 1 && span > 0 {
            span / (fixes.len() as i64 - 1)
        } else {
            DEFAULT_STEP_MS
        };

        Ok(Self {
            fixes,
            offsets,
            period_ms: span + step.max(1),
        })
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    /// The most recent fix due `elapsed_ms` after replay start, with a
    /// sequence number that grows with every distinct due fix.
    ///
    /// Without looping the last fix stays due forever.
    pub fn due(&self, elapsed_ms: i64, looping: bool) -> Option<(u64, i64, &LocationFix)> {
        if elapsed_ms < 0 {
            return None;
        }
        let (cycle, within) = if looping {
            (elapsed_ms / self.period_ms, elapsed_ms % self.period_ms)
        } else {
            (0, elapsed_ms)
        };
        let index = self.offsets.partition_point(|&o| o <= within).checked_sub(1)?;
        let sequence = cycle as u64 * self.fixes.len() as u64 + index as u64;
        let offset = cycle * self.period_ms + self.offsets[index];
        Some((sequence, offset, &self.fixes[index]))
    }
}

/// Location provider that replays a [`Trace`] against the context clock.
pub struct ReplayProvider<C: V2xContext> {
    ctx: Arc<C>,
    trace: Arc<Trace>,
    looping: bool,
    started_at: Duration,
    start_epoch_ms: i64,
}

impl<C: V2xContext> ReplayProvider<C> {
    pub fn new(ctx: Arc<C>, trace: Trace, looping: bool) -> Self {
        let started_at = ctx.now();
        let start_epoch_ms = ctx.epoch_millis();
        Self {
            ctx,
            trace: Arc::new(trace),
            looping,
            started_at,
            start_epoch_ms,
        }
    }

    fn elapsed_ms(&self) -> i64 {
        self.ctx.now().saturating_sub(self.started_at).as_millis() as i64
    }

    fn due_now(&self) -> Option<(u64, LocationFix)> {
        let elapsed = self.elapsed_ms();
        due_rebased(&self.trace, elapsed, self.looping, self.start_epoch_ms)
    }
}

fn due_rebased(trace: &Trace, elapsed: i64, looping: bool, start_epoch_ms: i64) -> Option<(u64, LocationFix)> {
    trace
        .due(elapsed, looping)
        .map(|(seq, offset, fix)| (seq, fix.with_timestamp(start_epoch_ms + offset)))
}

#[async_trait]
impl<C: V2xContext> LocationProvider for ReplayProvider<C> {
    async fn current_fix(&self, _priority: Priority) -> Option<LocationFix> {
        self.due_now().map(|(_, fix)| fix)
    }

    fn request_updates(
        &self,
        request: UpdateRequest,
        updates: mpsc::Sender<LocationFix>,
    ) -> Subscription {
        let (cancel, mut token) = cancel_pair();
        let ctx = self.ctx.clone();
        let trace = self.trace.clone();
        let looping = self.looping;
        let started_at = self.started_at;
        let start_epoch_ms = self.start_epoch_ms;

        self.ctx.spawn("replay", async move {
            let mut last_sent: Option<u64> = None;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ctx.sleep(request.interval) => {}
                }
                let elapsed = ctx.now().saturating_sub(started_at).as_millis() as i64;
                let Some((sequence, fix)) = due_rebased(&trace, elapsed, looping, start_epoch_ms)
                else {
                    continue;
                };
                if last_sent == Some(sequence) {
                    continue;
                }
                if updates.send(fix).await.is_err() {
                    break;
                }
                last_sent = Some(sequence);
            }
            debug!(priority = ?request.priority, "Replay subscription ended");
        });
        Subscription::new(cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use car2x_env::TokioContext;

    const TRACE: &str = r#"
# recorded on the ring road
{"lat":48.0,"lon":11.0,"accuracy":5.0,"speed":3.0,"timestamp":1000}

{"lat":48.001,"lon":11.0,"accuracy":5.0,"speed":3.0,"timestamp":2000}
{"lat":48.002,"lon":11.0,"accuracy":6.0,"timestamp":3000}
"#;

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let trace = Trace::parse(TRACE).unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.offsets, vec![0, 1000, 2000]);
        assert_eq!(trace.period_ms, 3000);
        assert_eq!(trace.fixes[2].speed, 0.0);
    }

    #[test]
    fn test_parse_reports_line_number() {
        let err = Trace::parse("{\"lat\":1.0,\"lon\":2.0,\"accuracy\":1.0,\"timestamp\":0}\n{oops}\n")
            .unwrap_err();
        assert!(matches!(err, TraceError::Parse { line: 2, .. }));
        assert!(err.to_string().starts_with("Line 2:"));
    }

    #[test]
    fn test_empty_trace_is_an_error() {
        assert!(matches!(Trace::parse("# nothing\n\n"), Err(TraceError::Empty)));
    }

    #[test]
    fn test_due_picks_latest_fix_at_or_before_elapsed() {
        let trace = Trace::parse(TRACE).unwrap();
        assert!(trace.due(-1, false).is_none());

        let (seq, offset, fix) = trace.due(0, false).unwrap();
        assert_eq!((seq, offset, fix.latitude), (0, 0, 48.0));

        let (seq, offset, fix) = trace.due(1999, false).unwrap();
        assert_eq!((seq, offset, fix.latitude), (1, 1000, 48.001));

        // Past the end without looping the last fix stays due.
        let (seq, offset, _) = trace.due(60_000, false).unwrap();
        assert_eq!((seq, offset), (2, 2000));
    }

    #[test]
    fn test_due_loops_with_growing_offsets() {
        let trace = Trace::parse(TRACE).unwrap();
        let (seq, offset, fix) = trace.due(4_500, true).unwrap();
        assert_eq!(seq, 4);
        assert_eq!(offset, 4_000);
        assert_eq!(fix.latitude, 48.001);
    }

    #[test]
    fn test_out_of_order_lines_are_sorted() {
        let trace = Trace::from_fixes(vec![
            LocationFix::new(2.0, 0.0, 5.0, 0.0, 5000),
            LocationFix::new(1.0, 0.0, 5.0, 0.0, 4000),
        ])
        .unwrap();
        assert_eq!(trace.due(0, false).unwrap().2.latitude, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_fix_is_rebased_to_start() {
        let ctx = TokioContext::shared();
        let provider = ReplayProvider::new(ctx.clone(), Trace::parse(TRACE).unwrap(), false);
        let fix = provider.current_fix(Priority::HighAccuracy).await.unwrap();
        let now = ctx.epoch_millis();
        assert_eq!(fix.latitude, 48.0);
        assert!(fix.timestamp <= now && now - fix.timestamp < 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_emits_each_due_fix_once() {
        let ctx = TokioContext::shared();
        let provider = ReplayProvider::new(ctx.clone(), Trace::parse(TRACE).unwrap(), false);
        let (tx, mut rx) = mpsc::channel(16);
        let subscription = provider.request_updates(UpdateRequest::high_accuracy(), tx);

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        let mut lats = Vec::new();
        while let Ok(fix) = rx.try_recv() {
            lats.push(fix.latitude);
        }
        assert_eq!(lats, vec![48.0, 48.001, 48.002]);

        subscription.cancel();
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_looping_subscription_keeps_timestamps_increasing() {
        let ctx = TokioContext::shared();
        let provider = ReplayProvider::new(ctx.clone(), Trace::parse(TRACE).unwrap(), true);
        let (tx, mut rx) = mpsc::channel(32);
        let _subscription = provider.request_updates(UpdateRequest::high_accuracy(), tx);

        tokio::time::sleep(Duration::from_millis(7_100)).await;
        let mut stamps = Vec::new();
        while let Ok(fix) = rx.try_recv() {
            stamps.push(fix.timestamp);
        }
        assert!(stamps.len() >= 6);
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }
}
