/// One wheel event observed while the pointer is over the comment pane, together with
/// the pane's scroll geometry at that moment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollSignal {
    pub delta_y: f64,
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollSignal {
    pub fn at_top(&self) -> bool {
        self.scroll_top <= 0.0
    }

    /// Sub-pixel layouts can leave the bottom one pixel short.
    pub fn at_bottom(&self) -> bool {
        let remaining = (self.scroll_height - self.scroll_top).floor();
        remaining == self.client_height || remaining == self.client_height - 1.0
    }
}

/// Which edge the pane is leaning against, shown as the "about to navigate" hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Indicator {
    #[default]
    Hidden,
    Top,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    /// Not at an edge, or no vertical intent.
    Ignored,
    /// At an edge but not yet confirmed.
    Pending,
    Previous,
    Next,
    /// Downward paging from a post that failed to load retries it instead.
    Reload,
}

#[derive(Debug)]
pub struct ScrollPaginator {
    confirmations: u32,
    count: u32,
    indicator: Indicator,
}

impl Default for ScrollPaginator {
    fn default() -> Self {
        Self::new(2)
    }
}

impl ScrollPaginator {
    pub fn new(confirmations: u32) -> Self {
        Self {
            confirmations: confirmations.max(1),
            count: 0,
            indicator: Indicator::Hidden,
        }
    }

    pub fn indicator(&self) -> Indicator {
        self.indicator
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Feeds one wheel event. `current_failed` is whether the post pane is showing a
    /// load failure.
    pub fn observe(&mut self, signal: &ScrollSignal, current_failed: bool) -> ScrollOutcome {
        let at_top = signal.at_top();
        let at_bottom = signal.at_bottom();
        if !at_top && !at_bottom {
            self.count = 0;
        }

        let (at_edge, edge, outcome) = if signal.delta_y < 0.0 {
            (at_top, Indicator::Top, ScrollOutcome::Previous)
        } else if signal.delta_y > 0.0 {
            let outcome = if current_failed {
                ScrollOutcome::Reload
            } else {
                ScrollOutcome::Next
            };
            (at_bottom, Indicator::Bottom, outcome)
        } else {
            return ScrollOutcome::Ignored;
        };

        // The hint only shows while leaning against the edge being scrolled towards.
        if !at_edge {
            self.indicator = Indicator::Hidden;
            return ScrollOutcome::Ignored;
        }
        self.indicator = edge;
        self.count += 1;
        if self.count < self.confirmations {
            return ScrollOutcome::Pending;
        }
        self.count = 0;
        log::debug!("scroll: confirmed {outcome:?}");
        outcome
    }

    /// Called after navigating: the new pane starts scrolled to the top with no hint.
    pub fn reset(&mut self) {
        self.count = 0;
        self.indicator = Indicator::Hidden;
    }
}

/// Id of the neighbouring post, for numeric ids only. Ids never go below 1.
pub fn neighbour_id(post_id: &str, outcome: ScrollOutcome) -> Option<String> {
    let id: i64 = post_id.trim().parse().ok()?;
    let next = match outcome {
        ScrollOutcome::Previous => id - 1,
        ScrollOutcome::Next => id + 1,
        ScrollOutcome::Reload => id,
        ScrollOutcome::Ignored | ScrollOutcome::Pending => return None,
    };
    (next >= 1).then(|| next.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn top(delta: f64) -> ScrollSignal {
        ScrollSignal {
            delta_y: delta,
            scroll_top: 0.0,
            scroll_height: 1000.0,
            client_height: 400.0,
        }
    }

    fn middle(delta: f64) -> ScrollSignal {
        ScrollSignal {
            scroll_top: 200.0,
            ..top(delta)
        }
    }

    fn bottom(delta: f64) -> ScrollSignal {
        ScrollSignal {
            scroll_top: 600.5,
            ..top(delta)
        }
    }

    #[test]
    fn single_edge_event_does_not_navigate() {
        let mut pager = ScrollPaginator::default();
        assert_eq!(pager.observe(&top(-10.0), false), ScrollOutcome::Pending);
        assert_eq!(pager.indicator(), Indicator::Top);
        assert_eq!(pager.count(), 1);
    }

    #[test]
    fn second_consecutive_edge_event_navigates_once() {
        let mut pager = ScrollPaginator::default();
        pager.observe(&top(-10.0), false);
        assert_eq!(pager.observe(&top(-10.0), false), ScrollOutcome::Previous);
        assert_eq!(pager.count(), 0);
        assert_eq!(pager.observe(&top(-10.0), false), ScrollOutcome::Pending);
    }

    #[test]
    fn leaving_the_edge_resets_the_counter() {
        let mut pager = ScrollPaginator::default();
        pager.observe(&bottom(5.0), false);
        assert_eq!(pager.observe(&middle(5.0), false), ScrollOutcome::Ignored);
        assert_eq!(pager.count(), 0);
        assert_eq!(pager.observe(&bottom(5.0), false), ScrollOutcome::Pending);
        assert_eq!(pager.observe(&bottom(5.0), false), ScrollOutcome::Next);
    }

    #[test]
    fn failed_post_reloads_instead_of_advancing() {
        let mut pager = ScrollPaginator::default();
        pager.observe(&bottom(5.0), true);
        assert_eq!(pager.observe(&bottom(5.0), true), ScrollOutcome::Reload);
    }

    #[test]
    fn wrong_direction_at_edge_is_ignored() {
        let mut pager = ScrollPaginator::default();
        assert_eq!(pager.observe(&top(10.0), false), ScrollOutcome::Ignored);
        assert_eq!(pager.indicator(), Indicator::Hidden);
    }

    #[test]
    fn indicator_hides_away_from_the_edge() {
        let mut pager = ScrollPaginator::default();
        assert_eq!(pager.observe(&middle(-10.0), false), ScrollOutcome::Ignored);
        assert_eq!(pager.indicator(), Indicator::Hidden);

        pager.observe(&bottom(5.0), false);
        assert_eq!(pager.indicator(), Indicator::Bottom);
        pager.observe(&middle(5.0), false);
        assert_eq!(pager.indicator(), Indicator::Hidden);

        pager.observe(&top(-10.0), false);
        assert_eq!(pager.indicator(), Indicator::Top);
        pager.reset();
        assert_eq!(pager.indicator(), Indicator::Hidden);
    }

    #[test]
    fn neighbour_ids() {
        assert_eq!(neighbour_id("10", ScrollOutcome::Previous).as_deref(), Some("9"));
        assert_eq!(neighbour_id("10", ScrollOutcome::Next).as_deref(), Some("11"));
        assert_eq!(neighbour_id("10", ScrollOutcome::Reload).as_deref(), Some("10"));
        assert_eq!(neighbour_id("1", ScrollOutcome::Previous), None);
        assert_eq!(neighbour_id("abc", ScrollOutcome::Next), None);
    }
}
