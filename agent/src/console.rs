//! Terminal presentation of status lines and warnings.

use std::io::Write;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use car2x_core::{StatusSink, WarningSink};

struct ConsoleState<W> {
    out: W,
    last_status: Option<String>,
}

/// Prints statuses and warnings to a writer.
///
/// A status identical to the previous one is not repeated, so the beacon's
/// per-tick status only shows up when it changes. Beacon summaries go to
/// the debug log.
pub struct ConsoleSink<W: Write + Send + 'static> {
    state: Mutex<ConsoleState<W>>,
}

impl ConsoleSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send + 'static> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: Mutex::new(ConsoleState {
                out,
                last_status: None,
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ConsoleState<W>) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.state.into_inner().unwrap_or_else(PoisonError::into_inner).out
    }
}

impl<W: Write + Send + 'static> StatusSink for ConsoleSink<W> {
    fn status(&self, text: &str) {
        self.with_state(|state| {
            if state.last_status.as_deref() == Some(text) {
                return;
            }
            state.last_status = Some(text.to_string());
            // Console output is best effort.
            let _ = writeln!(state.out, "{text}");
            let _ = state.out.flush();
        });
    }

    fn last_beacon(&self, text: &str) {
        debug!(target: "car2x::beacon", "{}", text.replace('\n', " "));
    }
}

impl<W: Write + Send + 'static> WarningSink for ConsoleSink<W> {
    fn warning(&self, text: &str) {
        self.with_state(|state| {
            let _ = writeln!(state.out, "\n{text}\n");
            let _ = state.out.flush();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printed(sink: ConsoleSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn test_repeated_status_printed_once() {
        let sink = ConsoleSink::new(Vec::new());
        sink.status("Status: Waiting for stable GPS...");
        sink.status("Status: Waiting for stable GPS...");
        sink.status("GPS OK (acc=5 m), v=0.0 km/h");
        sink.status("Status: Waiting for stable GPS...");

        assert_eq!(
            printed(sink),
            "Status: Waiting for stable GPS...\nGPS OK (acc=5 m), v=0.0 km/h\nStatus: Waiting for stable GPS...\n"
        );
    }

    #[test]
    fn test_warnings_are_set_apart() {
        let sink = ConsoleSink::new(Vec::new());
        sink.warning("⚠ DENM Warning ⚠\nEvent: ice");
        sink.warning("⚠ DENM Warning ⚠\nEvent: ice");
        assert_eq!(
            printed(sink),
            "\n⚠ DENM Warning ⚠\nEvent: ice\n\n\n⚠ DENM Warning ⚠\nEvent: ice\n\n"
        );
    }

    #[test]
    fn test_beacon_summary_not_printed() {
        let sink = ConsoleSink::new(Vec::new());
        sink.last_beacon("Last CAM:\nCAR0001 | Lat=1, Lon=2, Speed=0.0 km/h");
        assert!(printed(sink).is_empty());
    }
}
