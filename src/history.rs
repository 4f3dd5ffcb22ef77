use serde::{Deserialize, Serialize};

use crate::target::PreviewTarget;

/// Payload stored on a history entry pushed for an open preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryState {
    pub target: PreviewTarget,
    pub previous_url: String,
    pub previous_title: String,
}

/// Navigation stack of the host document.
pub trait History {
    fn push(&mut self, state: Option<HistoryState>, title: &str, url: &str);
    fn replace(&mut self, state: Option<HistoryState>, title: &str, url: &str);
    fn current_url(&self) -> String;
    fn current_state(&self) -> Option<HistoryState>;
    fn title(&self) -> String;
    fn set_title(&mut self, title: &str);
    /// Steps back one entry and returns the popped-to state, like a popstate event.
    /// `None` when already at the first entry.
    fn back(&mut self) -> Option<Option<HistoryState>>;
    fn forward(&mut self) -> Option<Option<HistoryState>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    state: Option<HistoryState>,
    url: String,
}

/// In-memory history with back/forward, for the headless binary and tests.
#[derive(Debug)]
pub struct MemoryHistory {
    entries: Vec<Entry>,
    index: usize,
    title: String,
}

impl MemoryHistory {
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            entries: vec![Entry {
                state: None,
                url: url.to_string(),
            }],
            index: 0,
            title: title.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl History for MemoryHistory {
    fn push(&mut self, state: Option<HistoryState>, title: &str, url: &str) {
        self.entries.truncate(self.index + 1);
        self.entries.push(Entry {
            state,
            url: url.to_string(),
        });
        self.index = self.entries.len() - 1;
        self.title = title.to_string();
    }

    fn replace(&mut self, state: Option<HistoryState>, title: &str, url: &str) {
        self.entries[self.index] = Entry {
            state,
            url: url.to_string(),
        };
        self.title = title.to_string();
    }

    fn current_url(&self) -> String {
        self.entries[self.index].url.clone()
    }

    fn current_state(&self) -> Option<HistoryState> {
        self.entries[self.index].state.clone()
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    fn back(&mut self) -> Option<Option<HistoryState>> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        Some(self.entries[self.index].state.clone())
    }

    fn forward(&mut self) -> Option<Option<HistoryState>> {
        if self.index + 1 >= self.entries.len() {
            return None;
        }
        self.index += 1;
        Some(self.entries[self.index].state.clone())
    }
}

/// What a popstate should do to the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopAction {
    /// The entry carries no preview: close the overlay.
    Close,
    /// Overlay is closed; open it at the target without pushing.
    Open(PreviewTarget),
    /// Overlay is open; swap its content to the target without pushing.
    Rehydrate(PreviewTarget),
}

/// Keeps the document's history in step with the overlay.
#[derive(Debug, Default)]
pub struct HistoryBridge {
    enabled: bool,
    saved: Option<(String, String)>,
}

impl HistoryBridge {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            saved: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pushes an entry for a newly shown target. The page URL and title from before the
    /// first open are kept for restoring on close.
    pub fn on_open(&mut self, history: &mut dyn History, target: &PreviewTarget, skip: bool) {
        if !self.enabled || skip {
            return;
        }
        let (previous_url, previous_title) = match &self.saved {
            Some(saved) => saved.clone(),
            None => {
                let saved = (history.current_url(), history.title());
                self.saved = Some(saved.clone());
                saved
            }
        };
        let title = document_title(&target.title, &previous_title);
        log::debug!("history: push {}", target.link);
        history.push(
            Some(HistoryState {
                target: target.clone(),
                previous_url,
                previous_title,
            }),
            &title,
            &target.link,
        );
        history.set_title(&title);
    }

    /// Corrects the current entry once the real title is known.
    pub fn on_loaded(&mut self, history: &mut dyn History, target: &PreviewTarget, title: &str) {
        if !self.enabled || title.is_empty() {
            return;
        }
        let Some(mut state) = history.current_state() else {
            return;
        };
        if state.target.cache_key() != target.cache_key() || state.target.title == title {
            return;
        }
        state.target.title = title.to_string();
        let document = document_title(title, &state.previous_title);
        log::debug!("history: replace {}", target.link);
        history.replace(Some(state), &document, &target.link);
        history.set_title(&document);
    }

    /// Restores the pre-open page. History-driven closes leave the stack alone.
    pub fn on_close(&mut self, history: &mut dyn History, history_driven: bool) {
        let Some((url, title)) = self.saved.take() else {
            return;
        };
        if !self.enabled || history_driven {
            history.set_title(&title);
            return;
        }
        log::debug!("history: push close entry {url}");
        history.push(None, &title, &url);
        history.set_title(&title);
    }

    /// Decides what a popstate does to the overlay. Never pushes.
    pub fn on_pop(&mut self, state: Option<HistoryState>, overlay_open: bool) -> PopAction {
        match state {
            None => PopAction::Close,
            Some(state) => {
                if self.saved.is_none() {
                    self.saved = Some((state.previous_url.clone(), state.previous_title.clone()));
                }
                if overlay_open {
                    PopAction::Rehydrate(state.target)
                } else {
                    PopAction::Open(state.target)
                }
            }
        }
    }
}

/// `"<post title> - <site section>"`, where the section is the last dash-separated part
/// of the listing page's title.
pub fn document_title(post_title: &str, page_title: &str) -> String {
    let section = page_title.rsplit('-').next().unwrap_or_default().trim();
    if section.is_empty() {
        post_title.to_string()
    } else {
        format!("{post_title} - {section}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(no: &str, title: &str) -> PreviewTarget {
        let mut target =
            PreviewTarget::from_link(&format!("/board/view/?id=rust&no={no}")).unwrap();
        target.title = title.into();
        target
    }

    #[test]
    fn document_title_uses_last_section() {
        assert_eq!(document_title("Hi", "rust gallery - dc"), "Hi - dc");
        assert_eq!(document_title("Hi", ""), "Hi");
    }

    #[test]
    fn open_then_close_round_trip() {
        let mut history = MemoryHistory::new("/board/lists/?id=rust", "rust - site");
        let mut bridge = HistoryBridge::new(true);
        bridge.on_open(&mut history, &target("1", "First"), false);
        assert_eq!(history.len(), 2);
        assert_eq!(history.title(), "First - site");
        assert_eq!(history.current_url(), "/board/view/?id=rust&no=1");

        bridge.on_close(&mut history, false);
        assert_eq!(history.len(), 3);
        assert_eq!(history.current_state(), None);
        assert_eq!(history.current_url(), "/board/lists/?id=rust");
        assert_eq!(history.title(), "rust - site");
    }

    #[test]
    fn loaded_title_replaces_entry() {
        let mut history = MemoryHistory::new("/list", "list - site");
        let mut bridge = HistoryBridge::new(true);
        let first = target("1", "");
        bridge.on_open(&mut history, &first, false);
        bridge.on_loaded(&mut history, &first, "Fetched");
        assert_eq!(history.len(), 2);
        assert_eq!(history.title(), "Fetched - site");
        assert_eq!(history.current_state().unwrap().target.title, "Fetched");
    }

    #[test]
    fn skipped_and_disabled_opens_do_not_push() {
        let mut history = MemoryHistory::new("/list", "list");
        let mut bridge = HistoryBridge::new(true);
        bridge.on_open(&mut history, &target("1", "a"), true);
        assert_eq!(history.len(), 1);

        let mut disabled = HistoryBridge::new(false);
        disabled.on_open(&mut history, &target("1", "a"), false);
        disabled.on_close(&mut history, false);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn pop_decides_between_close_open_and_rehydrate() {
        let mut bridge = HistoryBridge::new(true);
        assert_eq!(bridge.on_pop(None, true), PopAction::Close);
        let state = HistoryState {
            target: target("5", "x"),
            previous_url: "/list".into(),
            previous_title: "list".into(),
        };
        assert_eq!(
            bridge.on_pop(Some(state.clone()), false),
            PopAction::Open(state.target.clone())
        );
        assert_eq!(
            bridge.on_pop(Some(state.clone()), true),
            PopAction::Rehydrate(state.target)
        );
    }

    #[test]
    fn memory_history_back_and_forward() {
        let mut history = MemoryHistory::new("/list", "list");
        history.push(None, "a", "/a");
        history.push(None, "b", "/b");
        assert_eq!(history.back(), Some(None));
        assert_eq!(history.current_url(), "/a");
        history.push(None, "c", "/c");
        assert_eq!(history.len(), 3);
        assert_eq!(history.forward(), None);
    }
}
