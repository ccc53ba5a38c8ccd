//! Passive state observer: validates buffer invariants after every
//! dispatched event and emits structured trace records.
//!
//! Output goes through `tracing` under the `observer` target; the binary
//! routes that to a file appender. Nothing here ever writes to the
//! terminal. Disabled unless `SHLINE_TRACE` is set.

use line_render::RenderKind;
use line_text::{utf8, Buffer};
use tracing::{error, trace};

#[derive(Debug)]
pub struct StateObserver {
    enabled: bool,
    /// Events seen this session.
    depth: u64,
    /// Invariant violations detected.
    divergences: u64,
}

impl StateObserver {
    /// Honor the `SHLINE_TRACE` environment flag.
    pub fn from_env() -> Self {
        let enabled = std::env::var("SHLINE_TRACE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self::new(enabled)
    }

    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            depth: 0,
            divergences: 0,
        }
    }

    pub fn divergences(&self) -> u64 {
        self.divergences
    }

    /// Record a post-dispatch snapshot and re-validate the buffer
    /// invariants by full re-scan.
    pub fn observe(
        &mut self,
        op: &str,
        buffer: &Buffer,
        render: Option<RenderKind>,
        boundary_crossing: bool,
    ) {
        if !self.enabled {
            return;
        }
        self.depth += 1;

        let rescan = utf8::count_chars(buffer.as_bytes(), buffer.byte_len());
        let count_ok = rescan == buffer.char_count();
        let cursor_ok = buffer.cursor() <= buffer.byte_len()
            && utf8::is_boundary(buffer.as_bytes(), buffer.cursor());
        if !count_ok || !cursor_ok {
            self.divergences += 1;
            error!(
                target: "observer",
                op,
                buffer_len = buffer.byte_len(),
                cursor = buffer.cursor(),
                char_count = buffer.char_count(),
                rescan,
                count_ok,
                cursor_ok,
                "invariant_divergence"
            );
            debug_assert!(count_ok, "char_count diverged after {op}");
            debug_assert!(cursor_ok, "cursor off boundary after {op}");
            return;
        }

        let fallback_triggered = matches!(render, Some(RenderKind::Full));
        trace!(
            target: "observer",
            op,
            buffer_len = buffer.byte_len(),
            cursor = buffer.cursor(),
            char_count = buffer.char_count(),
            boundary_crossing,
            fallback_triggered,
            depth = self.depth,
            "snapshot"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_observer_records_nothing() {
        let mut obs = StateObserver::new(false);
        let buf = Buffer::from_str("ok");
        obs.observe("insert", &buf, None, false);
        assert_eq!(obs.divergences(), 0);
    }

    #[test]
    fn healthy_buffer_has_no_divergence() {
        let mut obs = StateObserver::new(true);
        let buf = Buffer::from_str("echo αβ");
        obs.observe("insert", &buf, Some(RenderKind::Incremental), false);
        obs.observe("move", &buf, Some(RenderKind::CursorOnly), false);
        assert_eq!(obs.divergences(), 0);
    }
}
