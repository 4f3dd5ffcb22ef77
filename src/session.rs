use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::admin::{AdminPanel, ModerationKind};
use crate::cache::{CacheEntry, ResultCache};
use crate::collab::{
    BlockCategory, BlockPredicate, Clipboard, EventBus, Notifier, PageContext, PageEvent,
};
use crate::comments::{self, CommentThread};
use crate::config::Config;
use crate::error::GatewayResult;
use crate::gateway::{
    format_count, BlockRequest, CancelToken, CaptchaKind, CommentDeletion, CommentDraft, Gateway,
    VoteCounts, VoteDirection,
};
use crate::history::{History, HistoryBridge, HistoryState, PopAction};
use crate::hover::BLOCKED_BODY_PLACEHOLDER;
use crate::markup;
use crate::post::{CommentAnchor, PostRecord};
use crate::scroll::{neighbour_id, Indicator, ScrollOutcome, ScrollPaginator, ScrollSignal};
use crate::target::{GalleryKind, PreviewTarget};
use crate::throttle::{ActionThrottle, Confirmation, KeyPressTracker};

pub const ADULT_GATE_TITLE: &str = "성인 인증이 필요한 게시글입니다.";
pub const ADULT_GATE_DETAIL: &str = "성인 인증을 하신 후 다시 시도해주세요.";
pub const LOADING_TITLE: &str = "게시글 로딩 중...";

const COLLAPSED_VOTE_NOTICE: &str = "댓글 보기를 클릭하여 댓글만 표시합니다.";
const NOT_LOADED_NOTICE: &str = "게시글이 로딩될 때까지 잠시 기다려주세요.";
const DOWNVOTE_DISABLED_NOTICE: &str = "비추천을 사용할 수 없는 갤러리입니다.";
const DELETE_KEY_NOTICE: &str = "한번 더 D키를 누르면 게시글을 삭제합니다.";
const COMMENT_DELETE_NOTICE: &str = "한번 더 누르면 댓글을 삭제합니다.";
const POST_DELETED_NOTICE: &str = "게시글을 삭제했습니다.";
const COMMENT_DELETED_NOTICE: &str = "댓글을 삭제하였습니다.";
const SHARE_NOTICE: &str = "클립보드에 복사되었습니다.";

const SHORT_NOTICE: Duration = Duration::from_millis(1000);
const NOTICE: Duration = Duration::from_millis(3000);

/// Overlay behaviour derived from the loaded configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub base_url: String,
    pub use_cache: bool,
    pub sync_history: bool,
    pub auto_refresh_comments: bool,
    pub comment_refresh_interval: Duration,
    pub admin_panel: bool,
    pub admin_shortcuts: bool,
    pub comment_writing: bool,
    pub scroll_to_skip: bool,
    pub scroll_confirmations: u32,
    pub confirm_window: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        let preview = &config.preview;
        Self {
            base_url: config.http.base_url.clone(),
            use_cache: !preview.disable_cache,
            sync_history: preview.sync_history,
            auto_refresh_comments: preview.auto_refresh_comments,
            comment_refresh_interval: preview.comment_refresh_interval(),
            admin_panel: preview.admin_panel,
            admin_shortcuts: preview.admin_shortcuts,
            comment_writing: preview.comment_writing,
            scroll_to_skip: preview.scroll_to_skip,
            scroll_confirmations: config.tuning.scroll_confirmations,
            confirm_window: config.tuning.confirm_window,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Everything the overlay talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn Gateway>,
    pub cache: Arc<Mutex<ResultCache>>,
    pub block: Arc<dyn BlockPredicate>,
    pub bus: Arc<dyn EventBus>,
    pub notifier: Arc<dyn Notifier>,
    pub page: Arc<dyn PageContext>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneError {
    pub title: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaneState<T> {
    Idle,
    Loading,
    /// Fetching again over content that was already shown or failed.
    Reloading,
    Loaded(T),
    Failed(PaneError),
    Closed,
}

impl<T> Default for PaneState<T> {
    fn default() -> Self {
        PaneState::Idle
    }
}

impl<T> PaneState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, PaneState::Loading | PaneState::Reloading)
    }

    pub fn is_reloading(&self) -> bool {
        matches!(self, PaneState::Reloading)
    }

    fn refetching(&self) -> Self {
        match self {
            PaneState::Loaded(_) | PaneState::Failed(_) | PaneState::Reloading => {
                PaneState::Reloading
            }
            _ => PaneState::Loading,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PaneState::Failed(_))
    }

    pub fn loaded(&self) -> Option<&T> {
        match self {
            PaneState::Loaded(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PaneError> {
        match self {
            PaneState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Post pane content. Vote counters are held here so a vote updates them without a
/// refetch.
#[derive(Debug, Clone, PartialEq)]
pub struct PostView {
    pub record: Arc<PostRecord>,
    /// Body as shown: the placeholder when the block predicate matches its text.
    pub body_html: String,
    pub upvotes: Option<String>,
    pub fixed_upvotes: Option<String>,
    pub downvotes: Option<String>,
}

impl PostView {
    fn new(record: Arc<PostRecord>, body_html: String) -> Self {
        Self {
            body_html,
            upvotes: record.upvotes.clone(),
            fixed_upvotes: record.fixed_upvotes.clone(),
            downvotes: record.downvotes.clone(),
            record,
        }
    }

    pub fn title(&self) -> String {
        self.record
            .title
            .as_deref()
            .map(markup::strip_tags)
            .unwrap_or_default()
    }
}

/// Comment pane content after block filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentView {
    pub thread: Arc<CommentThread>,
    pub subtitle: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptchaPurpose {
    Vote(VoteDirection),
    Comment(CommentDraft),
}

/// Popup waiting on user input. Abandoned when the overlay closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Captcha {
        purpose: CaptchaPurpose,
        image_url: String,
    },
    Block(BlockRequest),
}

/// Where "open original" leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginalLink {
    Reload,
    Navigate(String),
}

#[derive(Debug, Clone, Copy)]
struct RefreshTimer {
    interval: Duration,
    next_due: Instant,
}

enum AsyncResponse {
    Post {
        generation: u64,
        key: String,
        result: GatewayResult<PostRecord>,
    },
    Comments {
        generation: u64,
        key: String,
        result: GatewayResult<CommentThread>,
    },
    Vote {
        generation: u64,
        key: String,
        direction: VoteDirection,
        result: GatewayResult<VoteCounts>,
    },
    Captcha {
        generation: u64,
        purpose: CaptchaPurpose,
        result: GatewayResult<String>,
    },
    CommentSubmitted {
        generation: u64,
        result: GatewayResult<()>,
    },
    CommentDeleted {
        generation: u64,
        result: GatewayResult<()>,
    },
    Moderation {
        generation: u64,
        key: String,
        kind: ModerationKind,
        closes: bool,
        result: GatewayResult<String>,
    },
}

/// One preview overlay: two independently loading panes guarded by a cancellation
/// token that is replaced on every open, navigation and close.
pub struct OverlaySession {
    deps: Collaborators,
    settings: SessionSettings,
    history: Box<dyn History>,
    bridge: HistoryBridge,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    /// Outstanding requests keyed by the generation that issued them.
    in_flight: HashMap<u64, usize>,
    moderations: usize,
    built: bool,
    next_generation: u64,
    token: CancelToken,
    open: bool,
    collapsed: bool,
    target: Option<PreviewTarget>,
    post: PaneState<PostView>,
    comments: PaneState<CommentView>,
    anchor: Option<CommentAnchor>,
    admin: Option<AdminPanel>,
    prompt: Option<Prompt>,
    refresh: Option<RefreshTimer>,
    scroll: ScrollPaginator,
    throttle: ActionThrottle,
    keys: KeyPressTracker,
}

impl OverlaySession {
    pub fn new(deps: Collaborators, settings: SessionSettings, history: Box<dyn History>) -> Self {
        let (response_tx, response_rx) = unbounded();
        let token = CancelToken::new(0);
        token.cancel();
        Self {
            bridge: HistoryBridge::new(settings.sync_history),
            scroll: ScrollPaginator::new(settings.scroll_confirmations),
            throttle: ActionThrottle::new(settings.confirm_window),
            keys: KeyPressTracker::new(settings.confirm_window),
            deps,
            settings,
            history,
            response_tx,
            response_rx,
            in_flight: HashMap::new(),
            moderations: 0,
            built: false,
            next_generation: 1,
            token,
            open: false,
            collapsed: false,
            target: None,
            post: PaneState::Idle,
            comments: PaneState::Idle,
            anchor: None,
            admin: None,
            prompt: None,
            refresh: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn target(&self) -> Option<&PreviewTarget> {
        self.target.as_ref()
    }

    pub fn post(&self) -> &PaneState<PostView> {
        &self.post
    }

    pub fn comments(&self) -> &PaneState<CommentView> {
        &self.comments
    }

    pub fn anchor(&self) -> Option<&CommentAnchor> {
        self.anchor.as_ref()
    }

    pub fn admin(&self) -> Option<&AdminPanel> {
        self.admin.as_ref()
    }

    pub fn prompt(&self) -> Option<&Prompt> {
        self.prompt.as_ref()
    }

    pub fn history(&self) -> &dyn History {
        self.history.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.token.generation()
    }

    pub fn scroll_indicator(&self) -> Indicator {
        self.scroll.indicator()
    }

    pub fn refresh_due(&self) -> Option<Instant> {
        self.refresh.map(|timer| timer.next_due)
    }

    /// Every request still running, superseded ones included.
    pub fn in_flight(&self) -> usize {
        self.in_flight.values().sum::<usize>() + self.moderations
    }

    /// Requests whose outcome can still reach the user.
    fn outstanding(&self) -> usize {
        let current = if self.open && !self.token.is_cancelled() {
            self.in_flight
                .get(&self.token.generation())
                .copied()
                .unwrap_or(0)
        } else {
            0
        };
        current + self.moderations
    }

    fn is_current(&self, generation: u64) -> bool {
        self.open && generation == self.token.generation() && !self.token.is_cancelled()
    }

    fn notify(&self, message: &str, is_error: bool, duration: Duration) {
        self.deps.notifier.show(message, is_error, duration);
    }

    fn issue_token(&mut self) -> CancelToken {
        self.token.cancel();
        let generation = self.next_generation;
        self.next_generation += 1;
        self.token = CancelToken::new(generation);
        log::debug!("session: token {generation} issued");
        self.token.clone()
    }

    /// Runs `job` on a worker. `owner` is the generation the result belongs to;
    /// moderation jobs pass `None` since they outlive the overlay.
    fn spawn<F>(&mut self, owner: Option<u64>, job: F)
    where
        F: FnOnce() -> AsyncResponse + Send + 'static,
    {
        match owner {
            Some(generation) => *self.in_flight.entry(generation).or_default() += 1,
            None => self.moderations += 1,
        }
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let _ = tx.send(job());
        });
    }

    fn finished(&mut self, message: &AsyncResponse) {
        let generation = match message {
            AsyncResponse::Moderation { .. } => {
                self.moderations = self.moderations.saturating_sub(1);
                return;
            }
            AsyncResponse::Post { generation, .. }
            | AsyncResponse::Comments { generation, .. }
            | AsyncResponse::Vote { generation, .. }
            | AsyncResponse::Captcha { generation, .. }
            | AsyncResponse::CommentSubmitted { generation, .. }
            | AsyncResponse::CommentDeleted { generation, .. } => *generation,
        };
        if let Some(count) = self.in_flight.get_mut(&generation) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.in_flight.remove(&generation);
            }
        }
    }

    /// Opens the overlay at `target`, replacing whatever it showed.
    pub fn open(&mut self, target: PreviewTarget, history_skip: bool) {
        self.open_with(target, history_skip, false);
    }

    /// Opens with the post pane collapsed. Only the comments are fetched until the
    /// pane is expanded.
    pub fn open_collapsed(&mut self, target: PreviewTarget) {
        self.open_with(target, false, true);
    }

    fn open_with(&mut self, target: PreviewTarget, history_skip: bool, collapsed: bool) {
        log::info!("session: open {}", target.cache_key());
        self.open = true;
        self.built = true;
        self.collapsed = collapsed;
        self.show(target, history_skip);
    }

    /// Expanding a pane that was never fetched starts its load.
    pub fn toggle_collapsed(&mut self) {
        self.collapsed = !self.collapsed;
        if self.open && !self.collapsed && matches!(self.post, PaneState::Idle) {
            self.load_post(true);
        }
    }

    /// Swaps the open overlay to another post. Ignored while the post pane is still
    /// loading.
    pub fn navigate(&mut self, target: PreviewTarget, history_skip: bool) -> bool {
        if !self.open || self.post.is_loading() {
            return false;
        }
        log::info!("session: navigate {}", target.cache_key());
        self.show(target, history_skip);
        true
    }

    fn show(&mut self, target: PreviewTarget, history_skip: bool) {
        self.issue_token();
        self.refresh = None;
        self.prompt = None;
        self.throttle.clear();
        self.scroll.reset();
        self.anchor = None;
        self.admin = AdminPanel::attach(
            self.deps.page.as_ref(),
            self.settings.admin_panel,
            self.settings.admin_shortcuts,
            &target,
        );
        self.bridge
            .on_open(self.history.as_mut(), &target, history_skip);
        self.target = Some(target);
        self.post = PaneState::Idle;
        self.comments = PaneState::Idle;
        self.load(true);
    }

    /// Loads both panes, from the cache when allowed. A collapsed post pane stays
    /// idle.
    pub fn load(&mut self, use_cache: bool) {
        if !self.collapsed {
            self.load_post(use_cache);
        }
        self.load_comments(use_cache);
    }

    /// Reloads both panes, bypassing the cache unless asked otherwise.
    pub fn retry(&mut self, use_cache: bool) {
        if self.open {
            self.load(use_cache);
        }
    }

    pub fn retry_comments(&mut self, use_cache: bool) {
        if self.open {
            self.load_comments(use_cache);
        }
    }

    fn load_post(&mut self, use_cache: bool) {
        let Some(target) = self.target.clone() else {
            return;
        };
        let key = target.cache_key();
        self.post = self.post.refetching();

        if use_cache && self.settings.use_cache {
            let cached = self.deps.cache.lock().get(&key).and_then(|e| e.post.clone());
            if let Some(post) = cached {
                log::debug!("session: post {key} from cache");
                self.apply_post(&target, post);
                return;
            }
        }

        let gateway = Arc::clone(&self.deps.gateway);
        let token = self.token.clone();
        let generation = token.generation();
        self.spawn(Some(generation), move || AsyncResponse::Post {
            generation,
            result: gateway.fetch_post(&target, &token),
            key,
        });
    }

    fn load_comments(&mut self, use_cache: bool) {
        let Some(target) = self.target.clone() else {
            return;
        };
        let key = target.cache_key();
        self.comments = self.comments.refetching();

        if use_cache && self.settings.use_cache {
            let cached = self
                .deps
                .cache
                .lock()
                .get(&key)
                .and_then(|e| e.comments.clone());
            if let Some(thread) = cached {
                log::debug!("session: comments {key} from cache");
                self.apply_comments(&target, &thread);
                return;
            }
        }

        let gateway = Arc::clone(&self.deps.gateway);
        let token = self.token.clone();
        let generation = token.generation();
        self.spawn(Some(generation), move || AsyncResponse::Comments {
            generation,
            result: gateway.fetch_comments(&target, &token),
            key,
        });
    }

    fn apply_post(&mut self, target: &PreviewTarget, post: Arc<PostRecord>) {
        let anchor = post.comment_anchor(target);
        if post.is_adult_gated {
            self.post = PaneState::Failed(PaneError {
                title: ADULT_GATE_TITLE.to_string(),
                detail: ADULT_GATE_DETAIL.to_string(),
            });
        } else {
            let view = PostView::new(Arc::clone(&post), self.visible_body(target, &post));
            let title = view.title();
            self.post = PaneState::Loaded(view);
            self.bridge.on_loaded(self.history.as_mut(), target, &title);
        }

        self.deps
            .bus
            .emit(PageEvent::PostLoaded(Box::new(post.as_ref().clone())));
        self.deps.bus.emit(PageEvent::CommentAnchorLoaded {
            gallery: anchor.gallery.clone(),
            post_id: anchor.post_id.clone(),
        });
        self.anchor = Some(anchor);

        self.refresh = self
            .settings
            .auto_refresh_comments
            .then(|| RefreshTimer {
                interval: self.settings.comment_refresh_interval,
                next_due: Instant::now() + self.settings.comment_refresh_interval,
            });
    }

    fn visible_body(&self, target: &PreviewTarget, post: &PostRecord) -> String {
        let body = post.body_html.clone().unwrap_or_default();
        let blocked = self.deps.block.check(
            BlockCategory::Text,
            &markup::strip_tags(&body),
            Some(&target.gallery),
        );
        if blocked {
            log::debug!("session: body of {} blocked", target.cache_key());
            BLOCKED_BODY_PLACEHOLDER.to_string()
        } else {
            body
        }
    }

    fn apply_comments(&mut self, target: &PreviewTarget, thread: &CommentThread) {
        let visible =
            comments::filter_blocked(thread, self.deps.block.as_ref(), Some(&target.gallery));
        self.deps.bus.emit(PageEvent::CommentsLoaded {
            key: target.cache_key(),
            total: visible.total_count,
        });
        self.comments = PaneState::Loaded(CommentView {
            subtitle: visible.subtitle(),
            thread: Arc::new(visible),
        });
    }

    /// Applies every response that has arrived. Returns whether anything was handled.
    pub fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    /// Blocks until the open overlay's requests and any moderation have answered, or
    /// `timeout` passes. Workers of superseded generations are not waited on: a
    /// blocking request keeps its thread until the transport timeout even after its
    /// token is cancelled.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        self.wait_while(timeout, Self::outstanding)
    }

    /// Blocks until every worker has answered, superseded ones included.
    pub fn drain(&mut self, timeout: Duration) -> bool {
        self.wait_while(timeout, Self::in_flight)
    }

    fn wait_while(&mut self, timeout: Duration, pending: fn(&Self) -> usize) -> bool {
        let deadline = Instant::now() + timeout;
        while pending(self) > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.response_rx.recv_timeout(remaining) {
                Ok(message) => self.handle_async_response(message),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false;
                }
            }
        }
        true
    }

    /// Drives timers. Call periodically with the current time.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = self.poll_async();
        if let Some(timer) = self.refresh.as_mut() {
            if self.open && now >= timer.next_due {
                timer.next_due = now + timer.interval;
                if !self.comments.is_loading() {
                    log::debug!("session: auto-refreshing comments");
                    self.load_comments(false);
                    changed = true;
                }
            }
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        self.finished(&message);
        match message {
            AsyncResponse::Post {
                generation,
                key,
                result,
            } => {
                if !self.is_current(generation) {
                    log::debug!("session: discarded stale post {key}");
                    return;
                }
                let Some(target) = self.target.clone() else {
                    return;
                };
                match result {
                    Ok(post) => {
                        let post = Arc::new(post);
                        self.deps
                            .cache
                            .lock()
                            .set(&key, CacheEntry::with_post(Arc::clone(&post)));
                        self.apply_post(&target, post);
                    }
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => {
                        log::warn!("session: post {key} failed: {err}");
                        self.post = PaneState::Failed(PaneError {
                            title: "게시글".to_string(),
                            detail: err.user_message(),
                        });
                    }
                }
            }
            AsyncResponse::Comments {
                generation,
                key,
                result,
            } => {
                if !self.is_current(generation) {
                    log::debug!("session: discarded stale comments {key}");
                    return;
                }
                let Some(target) = self.target.clone() else {
                    return;
                };
                match result {
                    Ok(thread) => {
                        let thread = Arc::new(thread);
                        self.deps
                            .cache
                            .lock()
                            .set(&key, CacheEntry::with_comments(Arc::clone(&thread)));
                        self.apply_comments(&target, &thread);
                    }
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => {
                        log::warn!("session: comments {key} failed: {err}");
                        self.comments = PaneState::Failed(PaneError {
                            title: "댓글".to_string(),
                            detail: err.user_message(),
                        });
                    }
                }
            }
            AsyncResponse::Vote {
                generation,
                key,
                direction,
                result,
            } => match result {
                Ok(counts) => {
                    if !self.is_current(generation) {
                        return;
                    }
                    self.deps.cache.lock().delete(&key);
                    if let PaneState::Loaded(view) = &mut self.post {
                        let formatted = format_count(&counts.counts);
                        match direction {
                            VoteDirection::Up => {
                                view.upvotes = Some(formatted);
                                if let Some(fixed) = counts.fixed_counts.as_deref() {
                                    view.fixed_upvotes = Some(format_count(fixed));
                                }
                            }
                            VoteDirection::Down => view.downvotes = Some(formatted),
                        }
                    }
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => self.notify(&err.user_message(), true, NOTICE),
            },
            AsyncResponse::Captcha {
                generation,
                purpose,
                result,
            } => {
                if !self.is_current(generation) {
                    return;
                }
                match result {
                    Ok(image_url) => {
                        self.prompt = Some(Prompt::Captcha { purpose, image_url });
                    }
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => self.notify(&err.user_message(), true, NOTICE),
                }
            }
            AsyncResponse::CommentSubmitted { generation, result } => match result {
                Ok(()) => {
                    if self.is_current(generation) {
                        self.load_comments(false);
                    }
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => self.notify(&err.user_message(), true, NOTICE),
            },
            AsyncResponse::CommentDeleted { generation, result } => match result {
                Ok(()) => {
                    self.notify(COMMENT_DELETED_NOTICE, false, NOTICE);
                    if self.is_current(generation) {
                        self.load_comments(false);
                    }
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => self.notify(&err.user_message(), true, NOTICE),
            },
            AsyncResponse::Moderation {
                generation,
                key,
                kind,
                closes,
                result,
            } => self.finish_moderation(generation, &key, kind, closes, result),
        }
    }

    fn finish_moderation(
        &mut self,
        generation: u64,
        key: &str,
        kind: ModerationKind,
        closes: bool,
        result: GatewayResult<String>,
    ) {
        if matches!(kind, ModerationKind::Notice | ModerationKind::Promote) {
            self.deps.bus.emit(PageEvent::RefreshRequest);
        }
        let message = match result {
            Ok(message) => message,
            Err(err) => {
                log::warn!("session: {kind:?} on {key} failed: {err}");
                if !err.is_cancelled() {
                    self.notify(&err.user_message(), true, NOTICE);
                }
                return;
            }
        };

        log::info!("session: {kind:?} on {key} accepted");
        match kind {
            ModerationKind::Delete => {
                self.deps.cache.lock().delete(key);
                self.notify(POST_DELETED_NOTICE, false, NOTICE);
            }
            _ => self.notify(&message, false, NOTICE),
        }
        if matches!(kind, ModerationKind::Block | ModerationKind::Delete) {
            self.deps.bus.emit(PageEvent::RefreshRequest);
        }

        if !self.is_current(generation) {
            return;
        }
        if let Some(admin) = self.admin.as_mut() {
            if admin.target_key() == key {
                admin.accepted(kind);
            }
        }
        if closes {
            self.close();
        }
    }

    pub fn close(&mut self) {
        self.close_with(false);
    }

    fn close_with(&mut self, history_driven: bool) {
        if !self.open {
            return;
        }
        log::info!("session: close");
        self.token.cancel();
        self.open = false;
        self.collapsed = false;
        self.post = PaneState::Closed;
        self.comments = PaneState::Closed;
        self.admin = None;
        self.prompt = None;
        self.refresh = None;
        self.anchor = None;
        self.target = None;
        self.throttle.clear();
        self.scroll.reset();
        self.bridge.on_close(self.history.as_mut(), history_driven);
    }

    /// Handles a popstate carrying `state`.
    pub fn pop_state(&mut self, state: Option<HistoryState>) {
        match self.bridge.on_pop(state, self.open) {
            PopAction::Close => {
                if self.open {
                    self.close_with(true);
                } else if !self.built {
                    // Entry left by a full page load that never showed an overlay.
                    self.deps.page.reload();
                }
            }
            PopAction::Open(target) => self.open(target, true),
            PopAction::Rehydrate(target) => {
                self.navigate(target, true);
            }
        }
    }

    pub fn history_back(&mut self) -> bool {
        match self.history.back() {
            Some(state) => {
                self.pop_state(state);
                true
            }
            None => false,
        }
    }

    pub fn history_forward(&mut self) -> bool {
        match self.history.forward() {
            Some(state) => {
                self.pop_state(state);
                true
            }
            None => false,
        }
    }

    /// Wheel event over the overlay. Only events with the pointer inside the comment
    /// pane page between posts.
    pub fn scroll(&mut self, signal: &ScrollSignal, pointer_in_comments: bool) -> ScrollOutcome {
        if !self.open || !self.settings.scroll_to_skip || !pointer_in_comments {
            return ScrollOutcome::Ignored;
        }
        let outcome = self.scroll.observe(signal, self.post.is_failed());
        if matches!(
            outcome,
            ScrollOutcome::Previous | ScrollOutcome::Next | ScrollOutcome::Reload
        ) {
            let next = self.target.as_ref().and_then(|target| {
                neighbour_id(&target.post_id, outcome).map(|id| target.with_post_id(&id))
            });
            let Some(mut next) = next else {
                return ScrollOutcome::Ignored;
            };
            next.title = LOADING_TITLE.to_string();
            if !self.navigate(next, false) {
                return ScrollOutcome::Ignored;
            }
        }
        outcome
    }

    pub fn vote(&mut self, direction: VoteDirection) -> bool {
        if !self.open {
            return false;
        }
        if self.collapsed {
            self.notify(COLLAPSED_VOTE_NOTICE, true, NOTICE);
            return false;
        }
        let Some(view) = self.post.loaded() else {
            self.notify(NOT_LOADED_NOTICE, true, NOTICE);
            return false;
        };
        if direction == VoteDirection::Down && view.record.downvote_disabled {
            self.notify(DOWNVOTE_DISABLED_NOTICE, true, NOTICE);
            return false;
        }
        let needs_captcha = view.record.requires_vote_captcha;
        if needs_captcha {
            self.request_captcha(CaptchaPurpose::Vote(direction));
        } else {
            self.send_vote(direction, None);
        }
        true
    }

    fn send_vote(&mut self, direction: VoteDirection, code: Option<String>) {
        let Some(target) = self.target.clone() else {
            return;
        };
        let gateway = Arc::clone(&self.deps.gateway);
        let token = self.token.clone();
        let generation = token.generation();
        self.spawn(Some(generation), move || AsyncResponse::Vote {
            generation,
            key: target.cache_key(),
            direction,
            result: gateway.vote(&target, direction, code.as_deref(), &token),
        });
    }

    fn request_captcha(&mut self, purpose: CaptchaPurpose) {
        let Some(target) = self.target.clone() else {
            return;
        };
        let kind = match purpose {
            CaptchaPurpose::Vote(_) => CaptchaKind::Recommend,
            CaptchaPurpose::Comment(_) => CaptchaKind::Comment,
        };
        let gateway = Arc::clone(&self.deps.gateway);
        let token = self.token.clone();
        let generation = token.generation();
        self.spawn(Some(generation), move || AsyncResponse::Captcha {
            generation,
            result: gateway.request_captcha(&target, kind, &token),
            purpose,
        });
    }

    /// Completes the pending captcha prompt with the user's answer.
    pub fn submit_captcha(&mut self, code: &str) -> bool {
        match self.prompt.take() {
            Some(Prompt::Captcha { purpose, .. }) => {
                match purpose {
                    CaptchaPurpose::Vote(direction) => {
                        self.send_vote(direction, Some(code.to_string()))
                    }
                    CaptchaPurpose::Comment(draft) => {
                        self.send_comment(draft, Some(code.to_string()))
                    }
                }
                true
            }
            other => {
                self.prompt = other;
                false
            }
        }
    }

    pub fn cancel_prompt(&mut self) {
        self.prompt = None;
    }

    pub fn submit_comment(&mut self, draft: CommentDraft) -> bool {
        if !self.open || !self.settings.comment_writing {
            return false;
        }
        let Some(view) = self.post.loaded() else {
            self.notify(NOT_LOADED_NOTICE, true, NOTICE);
            return false;
        };
        if view.record.requires_comment_captcha {
            self.request_captcha(CaptchaPurpose::Comment(draft));
        } else {
            self.send_comment(draft, None);
        }
        true
    }

    fn send_comment(&mut self, draft: CommentDraft, code: Option<String>) {
        let (Some(target), Some(anchor)) = (self.target.clone(), self.anchor.clone()) else {
            return;
        };
        let gateway = Arc::clone(&self.deps.gateway);
        let token = self.token.clone();
        let generation = token.generation();
        self.spawn(Some(generation), move || AsyncResponse::CommentSubmitted {
            generation,
            result: gateway.submit_comment(&target, &anchor, &draft, code.as_deref(), &token),
        });
    }

    /// Deletes a comment. Without a password the first press only arms the action.
    pub fn delete_comment(&mut self, comment_id: &str, password: Option<&str>, now: Instant) -> bool {
        if !self.open {
            return false;
        }
        let Some(target) = self.target.clone() else {
            return false;
        };
        let password = password.filter(|p| !p.is_empty()).map(str::to_string);
        if password.is_none() {
            let key = format!("comment:{comment_id}");
            if self.throttle.press(&key, now) == Confirmation::Armed {
                self.notify(COMMENT_DELETE_NOTICE, true, SHORT_NOTICE);
                return false;
            }
        }
        let mode = if password.is_none() && self.deps.page.viewer_can_moderate() {
            CommentDeletion::Admin
        } else {
            CommentDeletion::Author { password }
        };
        let gateway = Arc::clone(&self.deps.gateway);
        let token = self.token.clone();
        let generation = token.generation();
        let comment_id = comment_id.to_string();
        self.spawn(Some(generation), move || AsyncResponse::CommentDeleted {
            generation,
            result: gateway.delete_comment(&target, &comment_id, &mode, &token),
        });
        true
    }

    /// Keyboard shortcut handler. `D` twice within the window deletes the post.
    pub fn key_down(&mut self, key: char, now: Instant) {
        if !self.open || !self.admin.as_ref().is_some_and(|admin| admin.shortcuts) {
            return;
        }
        let Some(count) = self.keys.press(key, now, self.deps.page.input_focused()) else {
            return;
        };
        if key.eq_ignore_ascii_case(&'d') {
            if count >= 2 {
                self.keys.reset(key);
                self.delete_post();
            } else {
                self.notify(DELETE_KEY_NOTICE, true, SHORT_NOTICE);
            }
        }
    }

    /// Moderation requests are not tied to the overlay token: they must finish even
    /// after the overlay closes.
    fn spawn_moderation<F>(&mut self, kind: ModerationKind, closes: bool, call: F)
    where
        F: FnOnce(&dyn Gateway, &PreviewTarget, &CancelToken) -> GatewayResult<String>
            + Send
            + 'static,
    {
        let Some(target) = self.target.clone() else {
            return;
        };
        let gateway = Arc::clone(&self.deps.gateway);
        let generation = self.token.generation();
        self.spawn(None, move || {
            let token = CancelToken::new(generation);
            AsyncResponse::Moderation {
                generation,
                key: target.cache_key(),
                kind,
                closes,
                result: call(gateway.as_ref(), &target, &token),
            }
        });
    }

    /// Closes the overlay, then deletes the post.
    pub fn delete_post(&mut self) -> bool {
        if self.admin.is_none() {
            return false;
        }
        self.spawn_moderation(ModerationKind::Delete, false, |gateway, target, token| {
            gateway.delete_post(target, token)
        });
        self.close();
        true
    }

    pub fn toggle_notice(&mut self) -> bool {
        let Some(set) = self.admin.as_ref().map(AdminPanel::next_notice) else {
            return false;
        };
        self.spawn_moderation(ModerationKind::Notice, false, move |gateway, target, token| {
            gateway.set_notice(target, set, token)
        });
        true
    }

    pub fn toggle_promoted(&mut self) -> bool {
        let Some(set) = self.admin.as_ref().map(AdminPanel::next_promoted) else {
            return false;
        };
        self.spawn_moderation(ModerationKind::Promote, false, move |gateway, target, token| {
            gateway.set_promoted(target, set, token)
        });
        true
    }

    pub fn open_block_prompt(&mut self) -> bool {
        if self.admin.is_none() {
            return false;
        }
        self.prompt = Some(Prompt::Block(BlockRequest::default()));
        true
    }

    pub fn block_prompt_mut(&mut self) -> Option<&mut BlockRequest> {
        match self.prompt.as_mut() {
            Some(Prompt::Block(request)) => Some(request),
            _ => None,
        }
    }

    pub fn submit_block(&mut self) -> bool {
        let request = match self.prompt.take() {
            Some(Prompt::Block(request)) => request,
            other => {
                self.prompt = other;
                return false;
            }
        };
        let closes = request.delete_post;
        self.spawn_moderation(ModerationKind::Block, closes, move |gateway, target, token| {
            gateway.block(target, &request, token)
        });
        true
    }

    /// Canonical link of the shown post.
    pub fn share_link(&self) -> Option<String> {
        let target = self.target.as_ref()?;
        let prefix = GalleryKind::from_link(&target.link).path_prefix();
        Some(format!(
            "{}/{prefix}board/view/?id={}&no={}",
            self.settings.base_url.trim_end_matches('/'),
            target.gallery,
            target.post_id
        ))
    }

    pub fn share(&self, clipboard: &mut dyn Clipboard) -> Result<()> {
        let link = self
            .share_link()
            .context("share: no post is open")?;
        clipboard.copy(&link).context("share: clipboard write failed")?;
        self.notify(SHARE_NOTICE, false, NOTICE);
        Ok(())
    }

    /// With history sync the address bar already shows the post, so a reload opens it.
    pub fn open_original(&self) -> Option<OriginalLink> {
        let target = self.target.as_ref()?;
        if self.bridge.is_enabled() {
            self.deps.page.reload();
            Some(OriginalLink::Reload)
        } else {
            Some(OriginalLink::Navigate(target.link.clone()))
        }
    }
}

impl Drop for OverlaySession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
