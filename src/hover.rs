use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::cache::{CacheEntry, ResultCache};
use crate::collab::{BlockCategory, BlockPredicate};
use crate::error::GatewayResult;
use crate::gateway::{CancelToken, Gateway};
use crate::markup;
use crate::post::PostRecord;
use crate::target::PreviewTarget;

pub const DEFAULT_HOVER_COOLDOWN: Duration = Duration::from_millis(150);
pub const BLOCKED_BODY_PLACEHOLDER: &str = "게시글 내용이 차단됐습니다.";

static MEDIA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<video\b.*?</video>|<(img|video|iframe|embed)\b[^>]*>")
        .expect("valid media regex")
});

/// Coalesces pointer-enter events. A leading event fires at once; events inside the
/// cool-down only schedule a trailing check, which fires if the pointer is still on the
/// same element when it comes due.
#[derive(Debug)]
pub struct HoverDebouncer<E> {
    cooldown: Duration,
    last_request: Option<Instant>,
    pending: Option<(Instant, E)>,
    hovered: Option<E>,
    suppressed: bool,
}

impl<E: Clone + PartialEq> HoverDebouncer<E> {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_request: None,
            pending: None,
            hovered: None,
            suppressed: false,
        }
    }

    /// Returns the element to request a preview for, if the event is not coalesced.
    pub fn enter(&mut self, element: E, now: Instant) -> Option<E> {
        self.suppressed = false;
        self.hovered = Some(element.clone());
        if let Some(last) = self.last_request {
            if now.saturating_duration_since(last) < self.cooldown {
                self.last_request = Some(now);
                self.pending = Some((now + self.cooldown, element));
                return None;
            }
        }
        self.last_request = Some(now);
        self.pending = None;
        Some(element)
    }

    /// Runs the trailing check once it is due.
    pub fn tick(&mut self, now: Instant) -> Option<E> {
        let due = self.pending.as_ref().map(|(at, _)| *at)?;
        if now < due {
            return None;
        }
        let (_, element) = self.pending.take()?;
        if self.suppressed || self.hovered.as_ref() != Some(&element) {
            return None;
        }
        self.enter(element, now)
    }

    pub fn leave(&mut self) {
        self.suppressed = true;
        self.hovered = None;
        self.pending = None;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(at, _)| *at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TooltipView {
    #[default]
    Hidden,
    Loading {
        title: String,
    },
    Ready {
        title: String,
        author: String,
        body_html: String,
    },
    Failed(String),
}

struct TooltipFetch {
    generation: u64,
    key: String,
    result: GatewayResult<PostRecord>,
}

struct ActiveTip {
    target: PreviewTarget,
    token: CancelToken,
    in_flight: bool,
}

/// Hover tooltip. Always reads through the shared cache regardless of the overlay's
/// cache setting.
pub struct Tooltip {
    gateway: Arc<dyn Gateway>,
    cache: Arc<Mutex<ResultCache>>,
    block: Arc<dyn BlockPredicate>,
    hide_media: bool,
    response_tx: Sender<TooltipFetch>,
    response_rx: Receiver<TooltipFetch>,
    next_generation: u64,
    active: Option<ActiveTip>,
    view: TooltipView,
}

impl Tooltip {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        cache: Arc<Mutex<ResultCache>>,
        block: Arc<dyn BlockPredicate>,
        hide_media: bool,
    ) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            gateway,
            cache,
            block,
            hide_media,
            response_tx,
            response_rx,
            next_generation: 1,
            active: None,
            view: TooltipView::Hidden,
        }
    }

    pub fn view(&self) -> &TooltipView {
        &self.view
    }

    pub fn show(&mut self, target: &PreviewTarget) {
        let key = target.cache_key();
        let cached = self
            .cache
            .lock()
            .get(&key)
            .and_then(|entry| entry.post.clone());
        if let Some(post) = cached {
            self.cancel_active();
            self.view = self.render(target, &post);
            return;
        }

        if let Some(active) = &self.active {
            if active.in_flight && active.target.cache_key() == key {
                return;
            }
        }
        self.cancel_active();

        let generation = self.next_generation;
        self.next_generation += 1;
        let token = CancelToken::new(generation);
        self.active = Some(ActiveTip {
            target: target.clone(),
            token: token.clone(),
            in_flight: true,
        });
        self.view = TooltipView::Loading {
            title: target.title.clone(),
        };

        let gateway = Arc::clone(&self.gateway);
        let tx = self.response_tx.clone();
        let target = target.clone();
        log::debug!("tooltip: fetching {key}");
        thread::spawn(move || {
            let result = gateway.fetch_post(&target, &token);
            let _ = tx.send(TooltipFetch {
                generation,
                key,
                result,
            });
        });
    }

    pub fn hide(&mut self) {
        self.cancel_active();
        self.view = TooltipView::Hidden;
    }

    fn cancel_active(&mut self) {
        if let Some(active) = self.active.take() {
            if active.in_flight {
                log::debug!("tooltip: cancelled {}", active.target.cache_key());
                active.token.cancel();
            }
        }
    }

    pub fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            changed |= self.handle_fetch(message);
        }
        changed
    }

    /// Blocks until the in-flight fetch lands or `timeout` passes.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.active.as_ref().is_some_and(|active| active.in_flight) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.response_rx.recv_timeout(remaining) {
                Ok(message) => {
                    self.handle_fetch(message);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false;
                }
            }
        }
        true
    }

    fn handle_fetch(&mut self, message: TooltipFetch) -> bool {
        let Some(active) = &mut self.active else {
            return false;
        };
        if active.token.generation() != message.generation || active.token.is_cancelled() {
            log::debug!("tooltip: discarded stale response for {}", message.key);
            return false;
        }
        active.in_flight = false;
        let target = active.target.clone();
        match message.result {
            Ok(post) => {
                let post = Arc::new(post);
                self.cache
                    .lock()
                    .set(&message.key, CacheEntry::with_post(Arc::clone(&post)));
                self.view = self.render(&target, &post);
            }
            Err(err) if err.is_cancelled() => return false,
            Err(err) => {
                self.view = TooltipView::Failed(err.user_message());
            }
        }
        true
    }

    fn render(&self, target: &PreviewTarget, post: &PostRecord) -> TooltipView {
        let title = post
            .title
            .as_deref()
            .map(markup::strip_tags)
            .unwrap_or_else(|| target.title.clone());
        let body = post.body_html.clone().unwrap_or_default();
        let blocked = self.block.check(
            BlockCategory::Text,
            &markup::strip_tags(&body),
            Some(&target.gallery),
        );
        let body_html = if blocked {
            BLOCKED_BODY_PLACEHOLDER.to_string()
        } else if self.hide_media {
            MEDIA_RE.replace_all(&body, "").into_owned()
        } else {
            body
        };
        TooltipView::Ready {
            title,
            author: post.author.display(),
            body_html,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn leading_event_fires_immediately() {
        let start = Instant::now();
        let mut hover = HoverDebouncer::new(DEFAULT_HOVER_COOLDOWN);
        assert_eq!(hover.enter("a", start), Some("a"));
        assert_eq!(hover.next_deadline(), None);
    }

    #[test]
    fn burst_coalesces_into_one_trailing_fire() {
        let start = Instant::now();
        let mut hover = HoverDebouncer::new(DEFAULT_HOVER_COOLDOWN);
        hover.enter("a", start);
        assert_eq!(hover.enter("b", start + ms(20)), None);
        assert_eq!(hover.enter("c", start + ms(40)), None);
        assert_eq!(hover.tick(start + ms(100)), None);
        assert_eq!(hover.next_deadline(), Some(start + ms(190)));
        assert_eq!(hover.tick(start + ms(190)), Some("c"));
        assert_eq!(hover.tick(start + ms(400)), None);
    }

    #[test]
    fn trailing_check_skipped_after_leave() {
        let start = Instant::now();
        let mut hover = HoverDebouncer::new(DEFAULT_HOVER_COOLDOWN);
        hover.enter("a", start);
        hover.enter("b", start + ms(10));
        hover.leave();
        assert_eq!(hover.tick(start + ms(500)), None);
    }

    #[test]
    fn media_is_stripped_when_hidden() {
        let html = r#"<p>a<img src="x.png">b</p><video src="v"><source></video>"#;
        assert_eq!(MEDIA_RE.replace_all(html, ""), "<p>ab</p>");
    }
}
