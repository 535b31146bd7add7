//! Preview sink — the render-facing overlay and summary state.
//!
//! Each detection cycle replaces the whole overlay set and summary text in
//! one step; there are no partial updates. Applications are gated by a
//! generation number so a cycle that resolves late can never overwrite the
//! output of a newer, already-rendered cycle.

use aspect_core::overlay::OverlayShape;
use std::sync::Mutex;

/// What the renderer currently shows.
#[derive(Debug, Clone, Default)]
pub struct PreviewState {
    /// Generation of the cycle that produced this state.
    pub generation: u64,
    pub shapes: Vec<OverlayShape>,
    pub summary: String,
}

/// Latest-cycle-wins holder for the preview overlay.
#[derive(Default)]
pub struct PreviewSink {
    state: Mutex<PreviewState>,
}

impl PreviewSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the overlay set and summary atomically.
    ///
    /// Returns `false` (and changes nothing) when `generation` is older
    /// than the newest generation already applied.
    pub fn apply(&self, generation: u64, shapes: Vec<OverlayShape>, summary: String) -> bool {
        let mut state = self.state.lock().unwrap();
        if generation < state.generation {
            tracing::debug!(
                stale = generation,
                current = state.generation,
                "discarding stale cycle result"
            );
            return false;
        }
        *state = PreviewState {
            generation,
            shapes,
            summary,
        };
        true
    }

    /// Clear the overlay for a failed or empty cycle, leaving only the
    /// given message. Same staleness rule as [`apply`](Self::apply).
    pub fn clear(&self, generation: u64, message: String) -> bool {
        self.apply(generation, Vec::new(), message)
    }

    pub fn snapshot(&self) -> PreviewState {
        self.state.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(left: f32) -> OverlayShape {
        OverlayShape {
            left,
            top: 0.0,
            right: left + 10.0,
            bottom: 10.0,
        }
    }

    #[test]
    fn test_apply_replaces_previous_state_atomically() {
        let sink = PreviewSink::new();
        assert!(sink.apply(1, vec![shape(1.0), shape(2.0)], "two faces".into()));
        assert!(sink.apply(2, vec![shape(3.0)], "one face".into()));

        let state = sink.snapshot();
        assert_eq!(state.generation, 2);
        assert_eq!(state.shapes.len(), 1);
        assert_eq!(state.summary, "one face");
    }

    #[test]
    fn test_stale_generation_is_discarded() {
        let sink = PreviewSink::new();
        assert!(sink.apply(5, vec![shape(1.0)], "new".into()));
        assert!(!sink.apply(4, vec![shape(9.0)], "stale".into()));

        let state = sink.snapshot();
        assert_eq!(state.generation, 5);
        assert_eq!(state.summary, "new");
    }

    #[test]
    fn test_clear_removes_shapes_but_keeps_message() {
        let sink = PreviewSink::new();
        sink.apply(1, vec![shape(1.0)], "face".into());
        sink.clear(2, "detection error".into());

        let state = sink.snapshot();
        assert!(state.shapes.is_empty());
        assert_eq!(state.summary, "detection error");
    }
}
