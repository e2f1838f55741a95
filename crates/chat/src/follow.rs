/// Gap past which a poll tick scrolls back to the tail.
pub const FOLLOW_GAP_PX: f32 = 10.0;
/// Gap within which a manual scroll re-arms follow mode.
pub const RESUME_GAP_PX: f32 = 50.0;

/// Decides when the message list should track new content.
///
/// The two thresholds are intentionally different: a small one for "the
/// view drifted off the tail, pull it back" and a larger one for "the user
/// returned near the bottom, resume following". Equal thresholds would
/// oscillate when content grows while the user hovers at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowTracker {
    following: bool,
}

impl FollowTracker {
    pub fn new() -> Self {
        Self { following: true }
    }

    pub fn is_following(&self) -> bool {
        self.following
    }

    /// Arms follow mode (called when a stream opens).
    pub fn engage(&mut self) {
        self.following = true;
    }

    /// Disarms follow mode (stream finished, or session reset). Keeps the
    /// tracker from fighting manual scrolling after the stream is over.
    pub fn disengage(&mut self) {
        self.following = false;
    }

    /// Poll-tick decision: scroll to the tail when following and the view
    /// has drifted more than the follow gap away from it.
    pub fn should_scroll(&self, gap_px: f32) -> bool {
        self.following && gap_px > FOLLOW_GAP_PX
    }

    /// Manual scroll observed at `gap_px` from the bottom: leaving the tail
    /// disables following, returning near it re-enables.
    pub fn on_manual_scroll(&mut self, gap_px: f32) {
        self.following = gap_px <= RESUME_GAP_PX;
    }
}

impl Default for FollowTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn following_scrolls_once_gap_exceeds_threshold() {
        let mut tracker = FollowTracker::new();
        tracker.engage();

        assert!(!tracker.should_scroll(0.0));
        assert!(!tracker.should_scroll(FOLLOW_GAP_PX));
        assert!(tracker.should_scroll(FOLLOW_GAP_PX + 1.0));
    }

    #[test]
    fn manual_scroll_away_disables_following() {
        let mut tracker = FollowTracker::new();
        tracker.engage();

        tracker.on_manual_scroll(RESUME_GAP_PX + 1.0);
        assert!(!tracker.is_following());
        assert!(!tracker.should_scroll(500.0));
    }

    #[test]
    fn scrolling_back_near_bottom_resumes_following() {
        let mut tracker = FollowTracker::new();
        tracker.on_manual_scroll(300.0);
        assert!(!tracker.is_following());

        tracker.on_manual_scroll(RESUME_GAP_PX);
        assert!(tracker.is_following());
    }

    #[test]
    fn hysteresis_band_does_not_oscillate() {
        let mut tracker = FollowTracker::new();
        tracker.engage();

        // Inside the band between the two thresholds: still following, and a
        // manual scroll there keeps following on.
        let band_gap = (FOLLOW_GAP_PX + RESUME_GAP_PX) / 2.0;
        tracker.on_manual_scroll(band_gap);
        assert!(tracker.is_following());
        assert!(tracker.should_scroll(band_gap));
    }

    #[test]
    fn disengage_suppresses_scrolling_regardless_of_gap() {
        let mut tracker = FollowTracker::new();
        tracker.disengage();
        assert!(!tracker.should_scroll(1000.0));
    }
}
