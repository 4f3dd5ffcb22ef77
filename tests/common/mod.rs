#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use gall_preview::cache::ResultCache;
use gall_preview::collab::{RecordingBus, RecordingNotifier, RuleSet, StaticPage};
use gall_preview::comments::{CommentEntry, CommentThread};
use gall_preview::error::{GatewayError, GatewayResult};
use gall_preview::gateway::{
    parse_vote_reply, BlockRequest, CancelToken, CaptchaKind, CommentDeletion, CommentDraft,
    Gateway, VoteCounts, VoteDirection,
};
use gall_preview::history::MemoryHistory;
use gall_preview::post::{Author, CommentAnchor, PostRecord};
use gall_preview::session::{Collaborators, OverlaySession, SessionSettings};
use gall_preview::target::PreviewTarget;

pub const WAIT: Duration = Duration::from_secs(5);
pub const LIST_URL: &str = "https://gall.dcinside.com/board/lists/?id=rust";
pub const LIST_TITLE: &str = "rust 갤러리 - 커뮤니티";

/// In-memory gateway answering from scripted replies and recording every call.
#[derive(Default)]
pub struct ScriptedGateway {
    pub posts: Mutex<HashMap<String, GatewayResult<PostRecord>>>,
    pub threads: Mutex<HashMap<String, GatewayResult<CommentThread>>>,
    pub vote_reply: Mutex<String>,
    pub moderation_reply: Mutex<Option<GatewayResult<String>>>,
    pub comment_delete_reply: Mutex<Option<GatewayResult<()>>>,
    gates: Mutex<HashMap<String, Receiver<()>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn with_post(self, post: PostRecord) -> Self {
        let key = format!("rust{}", post.id);
        self.posts.lock().insert(key, Ok(post));
        self
    }

    pub fn with_thread(self, post_id: &str, thread: CommentThread) -> Self {
        self.threads.lock().insert(format!("rust{post_id}"), Ok(thread));
        self
    }

    pub fn fail_post(&self, post_id: &str, err: GatewayError) {
        self.posts.lock().insert(format!("rust{post_id}"), Err(err));
    }

    /// Holds the next post fetch for `key` until the returned sender fires or drops.
    pub fn gate(&self, key: &str) -> Sender<()> {
        let (tx, rx) = bounded(1);
        self.gates.lock().insert(key.to_string(), rx);
        tx
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl Gateway for ScriptedGateway {
    fn fetch_post(&self, target: &PreviewTarget, _token: &CancelToken) -> GatewayResult<PostRecord> {
        let key = target.cache_key();
        self.record(format!("post:{key}"));
        let gate = self.gates.lock().remove(&key);
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        self.posts.lock().get(&key).cloned().unwrap_or_else(|| {
            Ok(PostRecord {
                id: target.post_id.clone(),
                title: Some(format!("post {}", target.post_id)),
                body_html: Some("<p>body</p>".into()),
                ..PostRecord::default()
            })
        })
    }

    fn fetch_comments(
        &self,
        target: &PreviewTarget,
        _token: &CancelToken,
    ) -> GatewayResult<CommentThread> {
        let key = target.cache_key();
        self.record(format!("comments:{key}"));
        self.threads
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Ok(CommentThread::default()))
    }

    fn vote(
        &self,
        target: &PreviewTarget,
        direction: VoteDirection,
        captcha: Option<&str>,
        _token: &CancelToken,
    ) -> GatewayResult<VoteCounts> {
        self.record(format!(
            "vote:{}:{direction:?}:{}",
            target.cache_key(),
            captcha.unwrap_or_default()
        ));
        parse_vote_reply(&self.vote_reply.lock())
    }

    fn delete_post(&self, target: &PreviewTarget, _token: &CancelToken) -> GatewayResult<String> {
        self.record(format!("delete:{}", target.cache_key()));
        self.moderation()
    }

    fn delete_comment(
        &self,
        target: &PreviewTarget,
        comment_id: &str,
        mode: &CommentDeletion,
        _token: &CancelToken,
    ) -> GatewayResult<()> {
        let how = match mode {
            CommentDeletion::Admin => "admin".to_string(),
            CommentDeletion::Author { password } => {
                format!("author:{}", password.as_deref().unwrap_or_default())
            }
        };
        self.record(format!("delete_comment:{}:{comment_id}:{how}", target.cache_key()));
        self.comment_delete_reply.lock().clone().unwrap_or(Ok(()))
    }

    fn block(
        &self,
        target: &PreviewTarget,
        request: &BlockRequest,
        _token: &CancelToken,
    ) -> GatewayResult<String> {
        self.record(format!("block:{}:{}", target.cache_key(), request.hours));
        self.moderation()
    }

    fn set_notice(
        &self,
        target: &PreviewTarget,
        set: bool,
        _token: &CancelToken,
    ) -> GatewayResult<String> {
        self.record(format!("notice:{}:{set}", target.cache_key()));
        self.moderation()
    }

    fn set_promoted(
        &self,
        target: &PreviewTarget,
        set: bool,
        _token: &CancelToken,
    ) -> GatewayResult<String> {
        self.record(format!("promote:{}:{set}", target.cache_key()));
        self.moderation()
    }

    fn request_captcha(
        &self,
        target: &PreviewTarget,
        kind: CaptchaKind,
        _token: &CancelToken,
    ) -> GatewayResult<String> {
        self.record(format!("captcha:{}:{kind:?}", target.cache_key()));
        Ok(format!("/kcaptcha/image/?gall_id={}", target.gallery))
    }

    fn submit_comment(
        &self,
        _target: &PreviewTarget,
        anchor: &CommentAnchor,
        draft: &CommentDraft,
        captcha: Option<&str>,
        _token: &CancelToken,
    ) -> GatewayResult<()> {
        self.record(format!(
            "comment:{}{}:{}:{}",
            anchor.gallery,
            anchor.post_id,
            draft.memo,
            captcha.unwrap_or_default()
        ));
        Ok(())
    }
}

impl ScriptedGateway {
    fn moderation(&self) -> GatewayResult<String> {
        self.moderation_reply
            .lock()
            .clone()
            .unwrap_or_else(|| Ok("처리되었습니다.".to_string()))
    }
}

pub fn target(no: &str) -> PreviewTarget {
    let mut target = PreviewTarget::from_link(&format!(
        "https://gall.dcinside.com/board/view/?id=rust&no={no}&page=1"
    ))
    .expect("valid link");
    target.title = format!("title {no}");
    target
}

pub fn post(id: &str, body: &str) -> PostRecord {
    PostRecord {
        id: id.to_string(),
        title: Some(format!("post {id}")),
        body_html: Some(body.to_string()),
        upvotes: Some("0".to_string()),
        ..PostRecord::default()
    }
}

pub fn comment(id: &str, depth: u32, nick: &str, uid: Option<&str>, body: &str) -> CommentEntry {
    CommentEntry {
        id: id.to_string(),
        depth,
        author: Author {
            nick: nick.to_string(),
            uid: uid.map(str::to_string),
            ip: None,
        },
        body_html: body.to_string(),
        media_reference: None,
        icon: None,
    }
}

pub fn test_settings() -> SessionSettings {
    SessionSettings {
        use_cache: true,
        ..SessionSettings::default()
    }
}

pub struct Harness {
    pub session: OverlaySession,
    pub gateway: Arc<ScriptedGateway>,
    pub cache: Arc<Mutex<ResultCache>>,
    pub block: Arc<RuleSet>,
    pub bus: Arc<RecordingBus>,
    pub notifier: Arc<RecordingNotifier>,
    pub page: Arc<StaticPage>,
}

impl Harness {
    pub fn new(gateway: ScriptedGateway, settings: SessionSettings) -> Self {
        Self::with_page(gateway, settings, StaticPage::default())
    }

    pub fn moderator(gateway: ScriptedGateway, settings: SessionSettings) -> Self {
        Self::with_page(gateway, settings, StaticPage::moderator())
    }

    fn with_page(gateway: ScriptedGateway, settings: SessionSettings, page: StaticPage) -> Self {
        let gateway = Arc::new(gateway);
        let cache = Arc::new(Mutex::new(ResultCache::new(50)));
        let block = Arc::new(RuleSet::new());
        let bus = Arc::new(RecordingBus::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let page = Arc::new(page);
        let deps = Collaborators {
            gateway: gateway.clone(),
            cache: cache.clone(),
            block: block.clone(),
            bus: bus.clone(),
            notifier: notifier.clone(),
            page: page.clone(),
        };
        let history = MemoryHistory::new(LIST_URL, LIST_TITLE);
        Self {
            session: OverlaySession::new(deps, settings, Box::new(history)),
            gateway,
            cache,
            block,
            bus,
            notifier,
            page,
        }
    }

    pub fn settle(&mut self) {
        assert!(self.session.settle(WAIT), "requests did not settle");
    }

    pub fn drain(&mut self) {
        assert!(self.session.drain(WAIT), "workers did not finish");
    }

    pub fn last_notice(&self) -> Option<(String, bool)> {
        self.notifier.last()
    }
}
