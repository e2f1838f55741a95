use gpui::{Bounds, Pixels, Point, Size, point};
use gpui_component::VirtualListScrollHandle;
use koda_chat::FollowTracker;

/// Small delta used to ignore floating-point scroll jitter.
const SCROLL_DELTA_EPSILON: f32 = 1.0;

/// Binds the virtual list's scroll handle to the follow-tracking rules.
///
/// The tracker decides *whether* to follow (hysteresis thresholds live in
/// `koda-chat`); this type owns the handle arithmetic: GPUI uses negative Y
/// offsets for scrolling down, so `offset + max` approaches zero at the tail.
pub struct ScrollManager {
    scroll_handle: VirtualListScrollHandle,
    tracker: FollowTracker,
    pending_scroll_to_bottom: bool,
    last_scroll_offset: Pixels,
    last_max_offset: Pixels,
}

impl ScrollManager {
    pub fn new() -> Self {
        Self {
            scroll_handle: VirtualListScrollHandle::new(),
            tracker: FollowTracker::new(),
            pending_scroll_to_bottom: false,
            last_scroll_offset: Pixels::ZERO,
            last_max_offset: Pixels::ZERO,
        }
    }

    pub fn handle(&self) -> &VirtualListScrollHandle {
        &self.scroll_handle
    }

    pub fn is_following(&self) -> bool {
        self.tracker.is_following()
    }

    /// Arms follow mode for a new stream and queues one jump to the tail.
    pub fn engage(&mut self) {
        self.tracker.engage();
        self.pending_scroll_to_bottom = true;
    }

    /// Stops tracking the tail (stream finished or session reset).
    pub fn disengage(&mut self) {
        self.tracker.disengage();
        self.pending_scroll_to_bottom = false;
    }

    pub fn request_scroll_to_bottom(&mut self) {
        self.pending_scroll_to_bottom = true;
    }

    /// Queues a jump to the tail only while follow mode is armed.
    pub fn request_scroll_if_following(&mut self) {
        if self.tracker.is_following() {
            self.pending_scroll_to_bottom = true;
        }
    }

    pub fn reset(&mut self) {
        self.last_scroll_offset = Pixels::ZERO;
        self.last_max_offset = Pixels::ZERO;
        self.tracker.engage();
        self.pending_scroll_to_bottom = true;
    }

    /// Classifies offset movement since the last frame. Offset changes with
    /// stable content size are user scrolls and feed the tracker's
    /// hysteresis; content growth alone never disables following.
    pub fn update_follow_state(&mut self) {
        let offset = self.scroll_handle.offset().y;
        let max_offset = self.scroll_handle.max_offset().height;
        let offset_delta = f32::from(offset) - f32::from(self.last_scroll_offset);
        let max_delta = (f32::from(max_offset) - f32::from(self.last_max_offset)).abs();
        let content_size_changed = max_delta > SCROLL_DELTA_EPSILON;
        let user_scrolled = offset_delta.abs() > SCROLL_DELTA_EPSILON && !content_size_changed;

        if user_scrolled {
            self.tracker.on_manual_scroll(Self::gap(offset, max_offset));
        }

        self.last_scroll_offset = offset;
        self.last_max_offset = max_offset;
    }

    /// One poll-tick of follow tracking: scrolls to the last element's
    /// bottom edge when the view drifted off the tail. Returns whether a
    /// scroll was issued.
    pub fn follow_tick(&mut self) -> bool {
        let offset = self.scroll_handle.offset().y;
        let max_offset = self.scroll_handle.max_offset().height;

        if !self.tracker.should_scroll(Self::gap(offset, max_offset)) {
            return false;
        }

        self.scroll_to_bottom();
        true
    }

    /// Applies a queued jump to the tail (initial hydration, new send).
    pub fn apply_pending_scroll(&mut self) -> bool {
        if !self.pending_scroll_to_bottom {
            return false;
        }

        self.scroll_to_bottom();
        self.pending_scroll_to_bottom = false;
        true
    }

    pub fn bounds(&self) -> Bounds<Pixels> {
        self.scroll_handle.bounds()
    }

    pub fn offset(&self) -> Point<Pixels> {
        self.scroll_handle.offset()
    }

    pub fn max_offset(&self) -> Size<Pixels> {
        self.scroll_handle.max_offset()
    }

    fn scroll_to_bottom(&mut self) {
        let max_offset = self.scroll_handle.max_offset().height;
        let current_x = self.scroll_handle.offset().x;
        let target_y = if max_offset > Pixels::ZERO {
            -max_offset
        } else {
            Pixels::ZERO
        };
        self.scroll_handle.set_offset(point(current_x, target_y));
    }

    fn gap(offset: Pixels, max_offset: Pixels) -> f32 {
        if max_offset <= Pixels::ZERO {
            return 0.0;
        }
        (f32::from(offset) + f32::from(max_offset)).abs()
    }
}

impl Default for ScrollManager {
    fn default() -> Self {
        Self::new()
    }
}
