//! Contracts of the host-page collaborators the preview engine relies on, plus small
//! in-process implementations used by the headless binary and the tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use parking_lot::Mutex;

use crate::post::PostRecord;

/// Content categories understood by the block predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockCategory {
    Nick,
    Id,
    Ip,
    Title,
    Text,
    Comment,
    Dccon,
}

impl fmt::Display for BlockCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockCategory::Nick => "NICK",
            BlockCategory::Id => "ID",
            BlockCategory::Ip => "IP",
            BlockCategory::Title => "TITLE",
            BlockCategory::Text => "TEXT",
            BlockCategory::Comment => "COMMENT",
            BlockCategory::Dccon => "DCCON",
        };
        f.write_str(name)
    }
}

/// Classifies values as blocked. `true` always means hide or replace the content.
pub trait BlockPredicate: Send + Sync {
    fn check(&self, category: BlockCategory, value: &str, scope: Option<&str>) -> bool;

    fn check_all(&self, values: &[(BlockCategory, String)], scope: Option<&str>) -> bool {
        values
            .iter()
            .any(|(category, value)| self.check(*category, value, scope))
    }

    fn add(
        &self,
        category: BlockCategory,
        value: &str,
        temporary: bool,
        expiry: Option<SystemTime>,
        label: Option<&str>,
    );
}

/// Named events exchanged with the rest of the page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    PostLoaded(Box<PostRecord>),
    CommentAnchorLoaded { gallery: String, post_id: String },
    CommentsLoaded { key: String, total: i64 },
    RefreshRequest,
}

pub trait EventBus: Send + Sync {
    fn emit(&self, event: PageEvent);
}

/// Toast surface. Fire and forget.
pub trait Notifier: Send + Sync {
    fn show(&self, message: &str, is_error: bool, duration: Duration);
}

/// Session layer: anti-forgery token, per-page form secrets and cookie markers.
pub trait SessionProvider: Send + Sync {
    fn csrf_token(&self) -> String;
    /// Per-page value the comment endpoint requires alongside each request.
    fn page_secret(&self) -> String;
    fn set_marker(&self, name: &str, value: &str, ttl: Duration);
}

/// Element-matching registration on the host page.
pub trait Filter {
    type Handle: Clone + fmt::Debug;

    fn attach(&mut self, selector: &str, never_expire: bool) -> Self::Handle;
    fn detach(&mut self, handle: Self::Handle);
}

pub trait Clipboard {
    fn copy(&mut self, text: &str) -> anyhow::Result<()>;
}

/// Clipboard of the desktop session.
pub struct SystemClipboard {
    inner: arboard::Clipboard,
}

impl SystemClipboard {
    pub fn new() -> anyhow::Result<Self> {
        let inner = arboard::Clipboard::new().context("clipboard: open")?;
        Ok(Self { inner })
    }
}

impl Clipboard for SystemClipboard {
    fn copy(&mut self, text: &str) -> anyhow::Result<()> {
        self.inner
            .set_text(text.to_string())
            .context("clipboard: write")
    }
}

/// Clipboard that keeps the last copied text.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    pub contents: Option<String>,
}

impl Clipboard for MemoryClipboard {
    fn copy(&mut self, text: &str) -> anyhow::Result<()> {
        self.contents = Some(text.to_string());
        Ok(())
    }
}

/// Host-page facts the overlay needs.
pub trait PageContext: Send + Sync {
    /// Whether the surrounding page renders moderation controls for the viewer.
    fn viewer_can_moderate(&self) -> bool;
    /// Whether any text input on the page or overlay currently has focus.
    fn input_focused(&self) -> bool;
    /// Last-resort recovery when the overlay cannot be closed programmatically.
    fn reload(&self);
}

/// Filter that only tracks which selectors are attached.
#[derive(Debug, Default)]
pub struct SelectorRegistry {
    next_handle: u64,
    active: Vec<(u64, String)>,
}

impl SelectorRegistry {
    pub fn active(&self) -> Vec<String> {
        self.active.iter().map(|(_, selector)| selector.clone()).collect()
    }
}

impl Filter for SelectorRegistry {
    type Handle = u64;

    fn attach(&mut self, selector: &str, _never_expire: bool) -> u64 {
        self.next_handle += 1;
        self.active.push((self.next_handle, selector.to_string()));
        self.next_handle
    }

    fn detach(&mut self, handle: u64) {
        self.active.retain(|(id, _)| *id != handle);
    }
}

/// Exact-match rule set keyed by category.
#[derive(Default)]
pub struct RuleSet {
    rules: Mutex<HashMap<BlockCategory, Vec<Rule>>>,
}

#[derive(Debug, Clone)]
struct Rule {
    value: String,
    expiry: Option<SystemTime>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockPredicate for RuleSet {
    fn check(&self, category: BlockCategory, value: &str, _scope: Option<&str>) -> bool {
        if value.is_empty() {
            return false;
        }
        let now = SystemTime::now();
        self.rules
            .lock()
            .get(&category)
            .map(|rules| {
                rules.iter().any(|rule| {
                    rule.value == value && rule.expiry.map(|at| at > now).unwrap_or(true)
                })
            })
            .unwrap_or(false)
    }

    fn add(
        &self,
        category: BlockCategory,
        value: &str,
        _temporary: bool,
        expiry: Option<SystemTime>,
        _label: Option<&str>,
    ) {
        self.rules.lock().entry(category).or_default().push(Rule {
            value: value.to_string(),
            expiry,
        });
    }
}

/// Records every emitted event.
#[derive(Default)]
pub struct RecordingBus {
    events: Mutex<Vec<PageEvent>>,
}

impl RecordingBus {
    pub fn events(&self) -> Vec<PageEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&PageEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| pred(event)).count()
    }
}

impl EventBus for RecordingBus {
    fn emit(&self, event: PageEvent) {
        log::debug!("bus: {event:?}");
        self.events.lock().push(event);
    }
}

/// Notification surface that writes to the log.
#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show(&self, message: &str, is_error: bool, _duration: Duration) {
        if is_error {
            log::warn!("notice: {message}");
        } else {
            log::info!("notice: {message}");
        }
    }
}

/// Keeps every notification for inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<(String, bool)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, bool)> {
        self.shown.lock().clone()
    }

    pub fn last(&self) -> Option<(String, bool)> {
        self.shown.lock().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, message: &str, is_error: bool, _duration: Duration) {
        self.shown.lock().push((message.to_string(), is_error));
    }
}

/// Session values supplied up front; markers are kept in memory.
#[derive(Default)]
pub struct StaticSession {
    csrf_token: Mutex<String>,
    page_secret: Mutex<String>,
    markers: Mutex<HashMap<String, (String, SystemTime)>>,
}

impl StaticSession {
    pub fn new(csrf_token: impl Into<String>, page_secret: impl Into<String>) -> Self {
        Self {
            csrf_token: Mutex::new(csrf_token.into()),
            page_secret: Mutex::new(page_secret.into()),
            markers: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the form secret, e.g. with the one scraped from a fetched page.
    pub fn set_page_secret(&self, secret: impl Into<String>) {
        *self.page_secret.lock() = secret.into();
    }

    pub fn marker(&self, name: &str) -> Option<String> {
        let now = SystemTime::now();
        self.markers
            .lock()
            .get(name)
            .filter(|(_, expires)| *expires > now)
            .map(|(value, _)| value.clone())
    }
}

impl SessionProvider for StaticSession {
    fn csrf_token(&self) -> String {
        self.csrf_token.lock().clone()
    }

    fn page_secret(&self) -> String {
        self.page_secret.lock().clone()
    }

    fn set_marker(&self, name: &str, value: &str, ttl: Duration) {
        let expires = SystemTime::now() + ttl;
        self.markers
            .lock()
            .insert(name.to_string(), (value.to_string(), expires));
    }
}

/// Page facts fixed at construction.
#[derive(Debug, Default)]
pub struct StaticPage {
    pub can_moderate: bool,
    pub input_focused: AtomicBool,
    pub reloads: AtomicUsize,
}

impl StaticPage {
    pub fn moderator() -> Self {
        Self {
            can_moderate: true,
            ..Self::default()
        }
    }

    pub fn set_input_focused(&self, focused: bool) {
        self.input_focused.store(focused, Ordering::SeqCst);
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl PageContext for StaticPage {
    fn viewer_can_moderate(&self) -> bool {
        self.can_moderate
    }

    fn input_focused(&self) -> bool {
        self.input_focused.load(Ordering::SeqCst)
    }

    fn reload(&self) {
        log::warn!("page: full reload requested");
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_set_matches_exact_values() {
        let rules = RuleSet::new();
        rules.add(BlockCategory::Id, "spammer", false, None, None);
        assert!(rules.check(BlockCategory::Id, "spammer", None));
        assert!(!rules.check(BlockCategory::Nick, "spammer", None));
        assert!(!rules.check(BlockCategory::Id, "", None));
        assert!(rules.check_all(
            &[
                (BlockCategory::Nick, "someone".into()),
                (BlockCategory::Id, "spammer".into()),
            ],
            Some("rust"),
        ));
    }

    #[test]
    fn expired_rules_do_not_match() {
        let rules = RuleSet::new();
        let past = SystemTime::now() - Duration::from_secs(5);
        rules.add(BlockCategory::Ip, "1.2", true, Some(past), Some("temp"));
        assert!(!rules.check(BlockCategory::Ip, "1.2", None));
    }

    #[test]
    fn registry_tracks_attached_selectors() {
        let mut registry = SelectorRegistry::default();
        let a = registry.attach(".a", true);
        let b = registry.attach(".b", false);
        registry.detach(a);
        assert_eq!(registry.active(), vec![".b".to_string()]);
        registry.detach(b);
        assert!(registry.active().is_empty());
    }

    #[test]
    fn markers_expire() {
        let session = StaticSession::new("t", "s");
        session.set_marker("a", "Y", Duration::from_secs(60));
        session.set_marker("b", "Y", Duration::ZERO);
        assert_eq!(session.marker("a").as_deref(), Some("Y"));
        assert_eq!(session.marker("b"), None);
        session.set_page_secret("fresh");
        assert_eq!(session.page_secret(), "fresh");
    }
}
