use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use serde_json::Value;
use url::Url;

use crate::collab::SessionProvider;
use crate::comments::{self, CommentThread};
use crate::error::{GatewayError, GatewayResult, Reply};
use crate::post::{self, CommentAnchor, PostRecord};
use crate::target::{GalleryKind, PreviewTarget};

const XHR_HEADER: &str = "X-Requested-With";
const XHR_VALUE: &str = "XMLHttpRequest";
const VOTE_MARKER_TTL: Duration = Duration::from_secs(3 * 60 * 60);

/// Cancellation handle shared by every request issued under one overlay session.
#[derive(Debug, Clone)]
pub struct CancelToken {
    generation: u64,
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with `Cancelled` once the token has been invalidated.
    pub fn check(&self) -> GatewayResult<()> {
        if self.is_cancelled() {
            Err(GatewayError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    fn mode(self) -> &'static str {
        match self {
            VoteDirection::Up => "U",
            VoteDirection::Down => "D",
        }
    }
}

/// Raw counters returned by a successful vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteCounts {
    pub counts: String,
    pub fixed_counts: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaKind {
    Comment,
    Recommend,
}

impl CaptchaKind {
    fn as_str(self) -> &'static str {
        match self {
            CaptchaKind::Comment => "comment",
            CaptchaKind::Recommend => "recommend",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockReason {
    #[default]
    Obscene,
    Advertising,
    Abuse,
    Flooding,
    Copyright,
    Defamation,
    Custom,
}

impl BlockReason {
    pub fn code(self) -> u8 {
        match self {
            BlockReason::Custom => 0,
            BlockReason::Obscene => 1,
            BlockReason::Advertising => 2,
            BlockReason::Abuse => 3,
            BlockReason::Flooding => 4,
            BlockReason::Copyright => 5,
            BlockReason::Defamation => 6,
        }
    }
}

/// Durations offered by the block picker, in hours.
pub const BLOCK_DURATIONS: [u32; 6] = [1, 6, 24, 168, 336, 720];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRequest {
    pub hours: u32,
    pub reason: BlockReason,
    pub reason_text: String,
    pub delete_post: bool,
}

impl Default for BlockRequest {
    fn default() -> Self {
        Self {
            hours: BLOCK_DURATIONS[0],
            reason: BlockReason::default(),
            reason_text: String::new(),
            delete_post: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentDeletion {
    /// Moderator removal, no password.
    Admin,
    /// Author removal; anonymous comments need their password.
    Author { password: Option<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentDraft {
    pub name: String,
    pub password: Option<String>,
    pub memo: String,
    pub reply_to: Option<String>,
}

/// Network operations of the preview engine. Every call may block; callers run them off
/// the UI thread and check the token before applying results.
pub trait Gateway: Send + Sync {
    fn fetch_post(&self, target: &PreviewTarget, token: &CancelToken) -> GatewayResult<PostRecord>;

    fn fetch_comments(
        &self,
        target: &PreviewTarget,
        token: &CancelToken,
    ) -> GatewayResult<CommentThread>;

    fn vote(
        &self,
        target: &PreviewTarget,
        direction: VoteDirection,
        captcha: Option<&str>,
        token: &CancelToken,
    ) -> GatewayResult<VoteCounts>;

    fn delete_post(&self, target: &PreviewTarget, token: &CancelToken) -> GatewayResult<String>;

    fn delete_comment(
        &self,
        target: &PreviewTarget,
        comment_id: &str,
        mode: &CommentDeletion,
        token: &CancelToken,
    ) -> GatewayResult<()>;

    fn block(
        &self,
        target: &PreviewTarget,
        request: &BlockRequest,
        token: &CancelToken,
    ) -> GatewayResult<String>;

    fn set_notice(
        &self,
        target: &PreviewTarget,
        set: bool,
        token: &CancelToken,
    ) -> GatewayResult<String>;

    fn set_promoted(
        &self,
        target: &PreviewTarget,
        set: bool,
        token: &CancelToken,
    ) -> GatewayResult<String>;

    /// Primes a captcha challenge and returns the image URL to show.
    fn request_captcha(
        &self,
        target: &PreviewTarget,
        kind: CaptchaKind,
        token: &CancelToken,
    ) -> GatewayResult<String>;

    fn submit_comment(
        &self,
        target: &PreviewTarget,
        anchor: &CommentAnchor,
        draft: &CommentDraft,
        captcha: Option<&str>,
        token: &CancelToken,
    ) -> GatewayResult<()>;
}

/// Parses a `result||counts||fixed` vote reply. On failure the second field carries the
/// server message.
pub fn parse_vote_reply(body: &str) -> GatewayResult<VoteCounts> {
    let mut parts = body.trim().split("||");
    let result = parts.next().unwrap_or_default();
    let counts = parts.next().unwrap_or_default().to_string();
    let fixed = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    if result != "true" {
        let message = if counts.is_empty() {
            body.trim().to_string()
        } else {
            counts
        };
        return Err(GatewayError::Rejected(message));
    }
    Ok(VoteCounts {
        counts,
        fixed_counts: fixed,
    })
}

/// Groups the digits of a counter with commas. Values that are not plain counters
/// are returned unchanged.
pub fn format_count(raw: &str) -> String {
    let digits: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return raw.trim().to_string();
    }
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Comment deletion replies come as `true`, `true||..`/`false||message`, or JSON
/// `{result, msg}` with `fail` marking rejection.
pub fn parse_comment_delete_reply(body: &str) -> GatewayResult<()> {
    let body = body.trim();
    if body.contains("||") {
        let mut parts = body.split("||");
        if parts.next() != Some("true") {
            return Err(GatewayError::Rejected(
                parts.next().unwrap_or_default().to_string(),
            ));
        }
        return Ok(());
    }
    if !body.starts_with('{') {
        return if body == "true" {
            Ok(())
        } else {
            Err(GatewayError::Rejected(body.to_string()))
        };
    }
    let value: Value = serde_json::from_str(body)?;
    if value.get("result").and_then(Value::as_str) == Some("fail") {
        let message = value
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(GatewayError::Rejected(message));
    }
    Ok(())
}

/// Comment submission replies: `false||message` or JSON whose `result` is `false` or
/// `PreNotWorking` are rejections; anything else is accepted.
pub fn parse_comment_submit_reply(body: &str) -> GatewayResult<()> {
    let body = body.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        let result = map.get("result").and_then(Value::as_str).unwrap_or_default();
        if result == "false" || result == "PreNotWorking" {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or(result)
                .to_string();
            return Err(GatewayError::Rejected(message));
        }
        return Ok(());
    }
    if let Some(message) = body.strip_prefix("false||") {
        return Err(GatewayError::Rejected(message.to_string()));
    }
    if body == "false" {
        return Err(GatewayError::Rejected(body.to_string()));
    }
    Ok(())
}

fn moderation_result(body: &str) -> GatewayResult<String> {
    let reply = Reply::classify(body);
    let message = reply.message().unwrap_or_default().to_string();
    reply.into_result().map(|_| message)
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub comments: &'static str,
    pub vote: &'static str,
    pub captcha: &'static str,
    pub captcha_image: &'static str,
    pub comment_submit: &'static str,
    pub comment_remove: &'static str,
    pub manage: &'static str,
    pub manage_mini: &'static str,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            comments: "/board/comment/",
            vote: "/board/recommend/vote",
            captcha: "/kcaptcha/session",
            captcha_image: "/kcaptcha/image/",
            comment_submit: "/board/forms/comment_submit",
            comment_remove: "/board/comment/comment_delete_submit",
            manage: "/ajax/minor_manager_board_ajax/",
            manage_mini: "/ajax/mini_manager_board_ajax/",
        }
    }
}

#[derive(Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

/// Gateway backed by the site's HTML pages and form endpoints.
pub struct HttpGateway {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    endpoints: Endpoints,
    session: Arc<dyn SessionProvider>,
}

impl HttpGateway {
    pub fn new(config: ClientConfig, session: Arc<dyn SessionProvider>) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("gateway: user agent required");
        }
        let base_url = Url::parse(&config.base_url)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Self {
            http,
            user_agent: config.user_agent,
            base_url,
            endpoints: Endpoints::default(),
            session,
        })
    }

    fn url(&self, path: &str) -> GatewayResult<Url> {
        self.base_url
            .join(path)
            .map_err(|err| GatewayError::Network(format!("bad url {path}: {err}")))
    }

    fn manage_url(&self, target: &PreviewTarget, action: &str) -> GatewayResult<Url> {
        let root = match GalleryKind::from_link(&target.link) {
            GalleryKind::Mini => self.endpoints.manage_mini,
            _ => self.endpoints.manage,
        };
        self.url(&format!("{root}{action}"))
    }

    /// The token is checked around the blocking `send`, not during it: a cancelled
    /// request holds its worker until the response or the client timeout arrives.
    fn get_text(&self, url: Url, token: &CancelToken) -> GatewayResult<String> {
        token.check()?;
        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()?;
        token.check()?;
        let status = resp.status();
        let body = resp.text()?;
        token.check()?;
        if !status.is_success() {
            return Err(GatewayError::Network(format!("http {status}")));
        }
        Ok(body)
    }

    fn post_form(
        &self,
        url: Url,
        mut form: Vec<(&'static str, String)>,
        token: &CancelToken,
        with_csrf: bool,
    ) -> GatewayResult<String> {
        token.check()?;
        if with_csrf {
            form.insert(0, ("ci_t", self.session.csrf_token()));
        }
        log::debug!("gateway: POST {url}");
        let resp = self
            .http
            .post(url)
            .header(USER_AGENT, &self.user_agent)
            .header(XHR_HEADER, XHR_VALUE)
            .form(&form)
            .send()?;
        token.check()?;
        let status = resp.status();
        let body = resp.text()?;
        token.check()?;
        if !status.is_success() {
            return Err(GatewayError::Network(format!("http {status}: {body}")));
        }
        Ok(body)
    }
}

fn gallery_type(target: &PreviewTarget) -> String {
    GalleryKind::from_link(&target.link).type_name().to_string()
}

impl Gateway for HttpGateway {
    fn fetch_post(&self, target: &PreviewTarget, token: &CancelToken) -> GatewayResult<PostRecord> {
        let kind = GalleryKind::from_link(&target.link);
        let mut url = self.url(&format!("/{}board/view/", kind.path_prefix()))?;
        url.query_pairs_mut()
            .append_pair("id", &target.gallery)
            .append_pair("no", &target.post_id);
        let body = self.get_text(url, token)?;
        post::parse_post_page(&target.post_id, &body)
    }

    fn fetch_comments(
        &self,
        target: &PreviewTarget,
        token: &CancelToken,
    ) -> GatewayResult<CommentThread> {
        let form = vec![
            ("id", target.gallery.clone()),
            ("no", target.post_id.clone()),
            ("cmt_id", target.gallery.clone()),
            ("cmt_no", target.post_id.clone()),
            ("e_s_n_o", self.session.page_secret()),
            ("comment_page", "1".to_string()),
            ("_GALLTYPE_", gallery_type(target)),
        ];
        let body = self.post_form(self.url(self.endpoints.comments)?, form, token, false)?;
        comments::parse_comment_body(&body)
    }

    fn vote(
        &self,
        target: &PreviewTarget,
        direction: VoteDirection,
        captcha: Option<&str>,
        token: &CancelToken,
    ) -> GatewayResult<VoteCounts> {
        let suffix = match direction {
            VoteDirection::Up => "",
            VoteDirection::Down => "_down",
        };
        self.session.set_marker(
            &format!("{}{}_Firstcheck{suffix}", target.gallery, target.post_id),
            "Y",
            VOTE_MARKER_TTL,
        );
        let form = vec![
            ("id", target.gallery.clone()),
            ("no", target.post_id.clone()),
            ("mode", direction.mode().to_string()),
            ("code_recommend", captcha.unwrap_or_default().to_string()),
            ("_GALLTYPE_", gallery_type(target)),
            ("link_id", target.gallery.clone()),
        ];
        let body = self.post_form(self.url(self.endpoints.vote)?, form, token, true)?;
        parse_vote_reply(&body)
    }

    fn delete_post(&self, target: &PreviewTarget, token: &CancelToken) -> GatewayResult<String> {
        let form = vec![
            ("id", target.gallery.clone()),
            ("nos[]", target.post_id.clone()),
            ("_GALLTYPE_", gallery_type(target)),
        ];
        let body = self.post_form(self.manage_url(target, "delete_list")?, form, token, true)?;
        moderation_result(&body)
    }

    fn delete_comment(
        &self,
        target: &PreviewTarget,
        comment_id: &str,
        mode: &CommentDeletion,
        token: &CancelToken,
    ) -> GatewayResult<()> {
        let (url, form) = match mode {
            CommentDeletion::Admin => (
                self.manage_url(target, "delete_comment")?,
                vec![
                    ("id", target.gallery.clone()),
                    ("_GALLTYPE_", gallery_type(target)),
                    ("pno", target.post_id.clone()),
                    ("cmt_nos[]", comment_id.to_string()),
                ],
            ),
            CommentDeletion::Author { password } => {
                let mut form = vec![
                    ("id", target.gallery.clone()),
                    ("_GALLTYPE_", gallery_type(target)),
                    ("mode", "del".to_string()),
                    ("re_no", comment_id.to_string()),
                ];
                if let Some(password) = password {
                    form.push(("re_password", password.clone()));
                }
                (self.url(self.endpoints.comment_remove)?, form)
            }
        };
        let body = self.post_form(url, form, token, true)?;
        parse_comment_delete_reply(&body)
    }

    fn block(
        &self,
        target: &PreviewTarget,
        request: &BlockRequest,
        token: &CancelToken,
    ) -> GatewayResult<String> {
        let form = vec![
            ("id", target.gallery.clone()),
            ("nos[]", target.post_id.clone()),
            ("parent", String::new()),
            ("_GALLTYPE_", gallery_type(target)),
            ("avoid_hour", request.hours.to_string()),
            ("avoid_reason", request.reason.code().to_string()),
            ("avoid_reason_txt", request.reason_text.clone()),
            ("del_chk", u8::from(request.delete_post).to_string()),
        ];
        let body = self.post_form(self.manage_url(target, "update_avoid_list")?, form, token, true)?;
        moderation_result(&body)
    }

    fn set_notice(
        &self,
        target: &PreviewTarget,
        set: bool,
        token: &CancelToken,
    ) -> GatewayResult<String> {
        let form = vec![
            ("mode", if set { "SET" } else { "REL" }.to_string()),
            ("id", target.gallery.clone()),
            ("no", target.post_id.clone()),
            ("_GALLTYPE_", gallery_type(target)),
        ];
        let body = self.post_form(self.manage_url(target, "set_notice")?, form, token, true)?;
        moderation_result(&body)
    }

    fn set_promoted(
        &self,
        target: &PreviewTarget,
        set: bool,
        token: &CancelToken,
    ) -> GatewayResult<String> {
        let form = vec![
            ("mode", if set { "SET" } else { "REL" }.to_string()),
            ("id", target.gallery.clone()),
            ("nos[]", target.post_id.clone()),
            ("_GALLTYPE_", gallery_type(target)),
        ];
        let body = self.post_form(self.manage_url(target, "set_recommend")?, form, token, true)?;
        moderation_result(&body)
    }

    fn request_captcha(
        &self,
        target: &PreviewTarget,
        kind: CaptchaKind,
        token: &CancelToken,
    ) -> GatewayResult<String> {
        let type_name = gallery_type(target);
        let form = vec![
            ("gall_id", target.gallery.clone()),
            ("kcaptcha_type", kind.as_str().to_string()),
            ("_GALLTYPE_", type_name.clone()),
        ];
        self.post_form(self.url(self.endpoints.captcha)?, form, token, true)?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Ok(format!(
            "{}?gall_id={}&kcaptcha_type={}&time={stamp}&_GALLTYPE_={type_name}",
            self.endpoints.captcha_image,
            target.gallery,
            kind.as_str()
        ))
    }

    fn submit_comment(
        &self,
        target: &PreviewTarget,
        anchor: &CommentAnchor,
        draft: &CommentDraft,
        captcha: Option<&str>,
        token: &CancelToken,
    ) -> GatewayResult<()> {
        let mut form = vec![
            ("id", anchor.gallery.clone()),
            ("no", anchor.post_id.clone()),
            ("name", draft.name.clone()),
            ("memo", draft.memo.clone()),
            ("e_s_n_o", self.session.page_secret()),
            ("_GALLTYPE_", gallery_type(target)),
        ];
        if let Some(password) = &draft.password {
            form.push(("password", password.clone()));
        }
        if let Some(parent) = &draft.reply_to {
            form.push(("c_no", parent.clone()));
        }
        if let Some(code) = captcha {
            form.push(("code", code.to_string()));
        }
        let body = self.post_form(self.url(self.endpoints.comment_submit)?, form, token, true)?;
        parse_comment_submit_reply(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_reply_success_and_rejection() {
        let counts = parse_vote_reply("true||1,234||").unwrap();
        assert_eq!(counts.counts, "1,234");
        assert_eq!(counts.fixed_counts, None);
        assert_eq!(
            parse_vote_reply("false||이미 추천하셨습니다.||").unwrap_err(),
            GatewayError::Rejected("이미 추천하셨습니다.".into())
        );
    }

    #[test]
    fn counts_are_grouped_by_thousands() {
        assert_eq!(format_count("1234"), "1,234");
        assert_eq!(format_count("1,234"), "1,234");
        assert_eq!(format_count("999"), "999");
        assert_eq!(format_count("1234567"), "1,234,567");
        assert_eq!(format_count("n/a"), "n/a");
    }

    #[test]
    fn comment_delete_reply_shapes() {
        assert!(parse_comment_delete_reply("true").is_ok());
        assert!(parse_comment_delete_reply("true||ok").is_ok());
        assert_eq!(
            parse_comment_delete_reply("false||비밀번호가 맞지 않습니다."),
            Err(GatewayError::Rejected("비밀번호가 맞지 않습니다.".into()))
        );
        assert!(parse_comment_delete_reply(r#"{"result":"success"}"#).is_ok());
        assert_eq!(
            parse_comment_delete_reply(r#"{"result":"fail","msg":"권한 없음"}"#),
            Err(GatewayError::Rejected("권한 없음".into()))
        );
        assert!(parse_comment_delete_reply("nope").is_err());
    }

    #[test]
    fn comment_submit_reply_shapes() {
        assert!(parse_comment_submit_reply("12345").is_ok());
        assert!(parse_comment_submit_reply("false||도배는 금지입니다").is_err());
        assert_eq!(
            parse_comment_submit_reply(r#"{"result":"PreNotWorking","message":"잠시 후"}"#),
            Err(GatewayError::Rejected("잠시 후".into()))
        );
    }

    #[test]
    fn moderation_reply_keeps_server_message() {
        assert_eq!(
            moderation_result(r#"{"result":"success","message":"삭제되었습니다"}"#).unwrap(),
            "삭제되었습니다"
        );
        assert_eq!(
            moderation_result(r#"{"result":"fail","message":"권한"}"#),
            Err(GatewayError::Rejected("fail: 권한".into()))
        );
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let token = CancelToken::new(7);
        assert!(token.check().is_ok());
        let clone = token.clone();
        token.cancel();
        assert_eq!(clone.check(), Err(GatewayError::Cancelled));
        assert_eq!(clone.generation(), 7);
    }

    #[test]
    fn http_gateway_requires_user_agent() {
        let session = Arc::new(crate::collab::StaticSession::new("t", "s"));
        let result = HttpGateway::new(
            ClientConfig {
                base_url: "https://example.com".into(),
                ..ClientConfig::default()
            },
            session,
        );
        assert!(result.is_err());
    }
}
