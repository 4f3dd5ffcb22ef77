use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cache::ResultCache;
use crate::collab::Filter;
use crate::config::{Config, PreviewConfig};
use crate::history::{History, HistoryState};
use crate::hover::{HoverDebouncer, Tooltip, TooltipView};
use crate::session::{Collaborators, OverlaySession, SessionSettings};
use crate::target::{ListEntry, PreviewTarget};

const LIST_SELECTOR: &str = ".gall_list .us-post .ub-word";
const WIDE_LIST_SELECTOR: &str = ".gall_list .us-post";
const ISSUE_ZOOM_SELECTOR: &str = "#right_issuezoom";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    Click,
    ContextMenu,
}

/// Which part of a row the gesture landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GestureOrigin {
    #[default]
    Row,
    /// The reply-count cell: open with only the comments visible.
    ReplyCount,
    /// The author cell has its own menu; previews never open from it.
    AuthorCell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GestureResult {
    Opened,
    /// Let the browser handle the event natively.
    Native,
    /// Follow the row's link instead of previewing.
    Navigate(String),
    Ignored,
}

/// Wires list-row gestures to the overlay and the hover tooltip. Created on module
/// enable; `disable` releases every handle.
pub struct PreviewModule<F: Filter> {
    settings: PreviewConfig,
    filter: F,
    handles: Vec<F::Handle>,
    session: OverlaySession,
    hover: HoverDebouncer<PreviewTarget>,
    tooltip: Tooltip,
    pressed_at: Option<Instant>,
    prevent_open: bool,
}

impl<F: Filter> PreviewModule<F> {
    pub fn new(config: &Config, deps: Collaborators, filter: F, history: Box<dyn History>) -> Self {
        let tooltip = Tooltip::new(
            Arc::clone(&deps.gateway),
            Arc::clone(&deps.cache),
            Arc::clone(&deps.block),
            config.preview.tooltip_media_hide,
        );
        Self {
            settings: config.preview.clone(),
            filter,
            handles: Vec::new(),
            session: OverlaySession::new(deps, SessionSettings::from_config(config), history),
            hover: HoverDebouncer::new(config.tuning.hover_cooldown),
            tooltip,
            pressed_at: None,
            prevent_open: false,
        }
    }

    /// Shared cache sized from the tuning section.
    pub fn cache_for(config: &Config) -> Arc<Mutex<ResultCache>> {
        Arc::new(Mutex::new(ResultCache::new(config.tuning.cache_capacity)))
    }

    pub fn selectors(&self) -> [&'static str; 2] {
        let list = if self.settings.expand_recognize_range {
            WIDE_LIST_SELECTOR
        } else {
            LIST_SELECTOR
        };
        [list, ISSUE_ZOOM_SELECTOR]
    }

    pub fn enable(&mut self) {
        if !self.handles.is_empty() {
            return;
        }
        let [list, issue_zoom] = self.selectors();
        self.handles.push(self.filter.attach(list, true));
        self.handles.push(self.filter.attach(issue_zoom, false));
        log::info!("preview: enabled");
    }

    pub fn disable(&mut self) {
        for handle in self.handles.drain(..) {
            self.filter.detach(handle);
        }
        self.session.close();
        self.tooltip.hide();
        self.hover.leave();
        log::info!("preview: disabled");
    }

    pub fn is_enabled(&self) -> bool {
        !self.handles.is_empty()
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    pub fn session(&self) -> &OverlaySession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut OverlaySession {
        &mut self.session
    }

    pub fn tooltip(&self) -> &TooltipView {
        self.tooltip.view()
    }

    pub fn mouse_down(&mut self, button: MouseButton, now: Instant) {
        if button == MouseButton::Secondary {
            self.pressed_at = Some(now);
        }
    }

    /// A secondary-button hold longer than the long-press delay lets the native context
    /// menu through instead of opening a preview.
    pub fn mouse_up(&mut self, button: MouseButton, now: Instant) {
        if button != MouseButton::Secondary {
            return;
        }
        if let Some(pressed) = self.pressed_at {
            if now.saturating_duration_since(pressed) > self.settings.long_press_delay() {
                self.prevent_open = true;
                self.pressed_at = None;
            }
        }
    }

    pub fn gesture(
        &mut self,
        kind: GestureKind,
        entry: &ListEntry,
        origin: GestureOrigin,
    ) -> GestureResult {
        if !self.is_enabled() {
            return GestureResult::Native;
        }
        let opens = match kind {
            GestureKind::ContextMenu => !self.settings.reverse_preview_key,
            GestureKind::Click => self.settings.reverse_preview_key,
        };
        if !opens {
            return match (kind, self.settings.reverse_preview_key) {
                (GestureKind::ContextMenu, true) => entry
                    .href
                    .clone()
                    .map(GestureResult::Navigate)
                    .unwrap_or(GestureResult::Ignored),
                _ => GestureResult::Native,
            };
        }

        if self.prevent_open {
            self.prevent_open = false;
            return GestureResult::Native;
        }
        if origin == GestureOrigin::AuthorCell {
            return GestureResult::Native;
        }

        self.tooltip.hide();
        self.hover.leave();
        let Some(target) = PreviewTarget::resolve(entry) else {
            return GestureResult::Ignored;
        };
        if origin == GestureOrigin::ReplyCount {
            self.session.open_collapsed(target);
        } else {
            self.session.open(target, false);
        }
        GestureResult::Opened
    }

    pub fn pointer_enter(&mut self, entry: &ListEntry, now: Instant) {
        if !self.settings.tooltip_mode || !self.is_enabled() {
            return;
        }
        let Some(target) = PreviewTarget::resolve(entry) else {
            return;
        };
        if let Some(target) = self.hover.enter(target, now) {
            self.tooltip.show(&target);
        }
    }

    pub fn pointer_leave(&mut self) {
        self.hover.leave();
        self.tooltip.hide();
    }

    pub fn pop_state(&mut self, state: Option<HistoryState>) {
        self.session.pop_state(state);
    }

    /// Drives the trailing hover check, the tooltip, and the overlay timers.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;
        if let Some(target) = self.hover.tick(now) {
            self.tooltip.show(&target);
            changed = true;
        }
        changed |= self.tooltip.poll_async();
        changed |= self.session.tick(now);
        changed
    }

    /// Waits for outstanding tooltip and overlay requests.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let tooltip = self.tooltip.settle(timeout);
        self.session.settle(timeout) && tooltip
    }
}

impl<F: Filter> Drop for PreviewModule<F> {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            self.filter.detach(handle);
        }
    }
}
