use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::markup::{self, Selector};
use crate::target::PreviewTarget;

const NOTICE_REGISTER_LABEL: &str = "공지 등록";
const ADULT_GATE_MARKER: &str = "/error/adult";

static ANCHOR_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\(document\)\.data\('comment_id',\s'([^']+)'\);").expect("valid anchor id regex")
});
static ANCHOR_NO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\(document\)\.data\('comment_no',\s'([^']+)'\);").expect("valid anchor no regex")
});
static HEADER_BRACKETS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(.*)\]$").expect("valid header regex"));
static EXPIRE_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s자동\s삭제").expect("valid expiry regex"));
static VIEWS_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"조회\s").expect("valid views regex"));
static UPVOTES_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"추천\s").expect("valid upvotes regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub nick: String,
    pub uid: Option<String>,
    pub ip: Option<String>,
}

impl Author {
    pub fn display(&self) -> String {
        match (&self.uid, &self.ip) {
            (Some(uid), _) => format!("{} ({uid})", self.nick),
            (None, Some(ip)) => format!("{} ({ip})", self.nick),
            (None, None) => self.nick.clone(),
        }
    }
}

/// One fetched post page. Never mutated; a refetch produces a new record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: String,
    pub header: Option<String>,
    pub title: Option<String>,
    pub date: Option<String>,
    pub expire_at: Option<String>,
    pub author: Author,
    pub view_count: Option<String>,
    pub upvotes: Option<String>,
    pub fixed_upvotes: Option<String>,
    pub downvotes: Option<String>,
    pub body_html: Option<String>,
    pub comment_anchor_id: Option<String>,
    pub comment_anchor_no: Option<String>,
    pub is_notice: bool,
    pub is_adult_gated: bool,
    pub requires_vote_captcha: bool,
    pub requires_comment_captcha: bool,
    pub downvote_disabled: bool,
    #[serde(skip)]
    pub raw_document: String,
}

/// Gallery/post pair the comment endpoints are keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentAnchor {
    pub gallery: String,
    pub post_id: String,
}

impl PostRecord {
    /// Comment anchor advertised by the page, falling back to the post itself.
    pub fn comment_anchor(&self, target: &PreviewTarget) -> CommentAnchor {
        CommentAnchor {
            gallery: self
                .comment_anchor_id
                .clone()
                .unwrap_or_else(|| target.gallery.clone()),
            post_id: self
                .comment_anchor_no
                .clone()
                .unwrap_or_else(|| target.post_id.clone()),
        }
    }

    pub fn posted_at(&self) -> Option<NaiveDateTime> {
        self.date.as_deref().and_then(parse_page_date)
    }

    pub fn expires_at(&self) -> Option<NaiveDateTime> {
        self.expire_at.as_deref().and_then(parse_page_date)
    }

    /// Per-page secret the comment endpoints expect, read from the page's hidden input.
    pub fn form_secret(&self) -> Option<String> {
        markup::find(
            &self.raw_document,
            Selector::tag("input").with_attr("id", "e_s_n_o"),
        )
        .and_then(|el| el.attr("value"))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
    }

    pub fn views_label(&self) -> Option<String> {
        self.view_count.as_ref().map(|views| format!("조회 {views}회"))
    }
}

/// Parses dates rendered as `2024.01.31 12:34:56` (or dashed).
pub fn parse_page_date(raw: &str) -> Option<NaiveDateTime> {
    let normalized = raw.trim().replace('.', "-");
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M"))
        .ok()
}

/// Scrapes a post page. Pages with neither a subject nor a body and no adult gate are
/// not post pages (deleted posts redirect to an error page) and fail to parse.
pub fn parse_post_page(id: &str, body: &str) -> GatewayResult<PostRecord> {
    let head_end = body.find("</head>").unwrap_or(0);
    let is_adult_gated = body[..head_end].contains(ADULT_GATE_MARKER);

    let title = markup::find(body, Selector::class("title_subject")).map(|el| el.html());
    let body_html = markup::find(body, Selector::class("writing_view_box")).map(|el| el.html());

    if !is_adult_gated && title.is_none() && body_html.is_none() {
        return Err(GatewayError::Parse(format!(
            "post {id}: page carries no post content"
        )));
    }

    let header = markup::find(body, Selector::class("title_headtext")).map(|el| {
        let text = el.html();
        HEADER_BRACKETS_RE.replace(&text, "$1").into_owned()
    });

    let date = markup::find_path(body, &[Selector::class("fl"), Selector::class("gall_date")])
        .map(|el| el.html());

    let expire_at = markup::find_path(
        body,
        &[
            Selector::tag_class("span", "mini_autodeltime"),
            Selector::tag_class("div", "pop_tipbox"),
            Selector::tag("div"),
        ],
    )
    .map(|el| EXPIRE_SUFFIX_RE.replace(&el.html(), "").into_owned());

    let view_count = markup::find_path(body, &[Selector::class("fr"), Selector::class("gall_count")])
        .map(|el| VIEWS_PREFIX_RE.replace(&el.html(), "").into_owned());
    let upvotes = markup::find_path(
        body,
        &[Selector::class("fr"), Selector::class("gall_reply_num")],
    )
    .map(|el| UPVOTES_PREFIX_RE.replace(&el.html(), "").into_owned());
    let fixed_upvotes = markup::find_path(
        body,
        &[Selector::class("sup_num"), Selector::class("smallnum")],
    )
    .map(|el| el.html());
    let downvotes = markup::find_path(
        body,
        &[
            Selector::tag_class("div", "btn_recommend_box"),
            Selector::class("down_num"),
        ],
    )
    .map(|el| el.html());

    let author = markup::find_path(
        body,
        &[Selector::class("gallview_head"), Selector::class("gall_writer")],
    )
    .map(|el| Author {
        nick: el.attr("data-nick").unwrap_or_default().to_string(),
        uid: el.attr("data-uid").filter(|v| !v.is_empty()).map(str::to_string),
        ip: el.attr("data-ip").filter(|v| !v.is_empty()).map(str::to_string),
    })
    .unwrap_or_default();

    let is_notice = markup::find_path(
        body,
        &[
            Selector::class("user_control"),
            Selector::class("option_box"),
            Selector::tag("li"),
        ],
    )
    .map(|el| el.text() != NOTICE_REGISTER_LABEL)
    .unwrap_or(false);

    let requires_vote_captcha = markup::find(body, Selector::class("recommend_kapcode")).is_some();
    let requires_comment_captcha = markup::find(body, Selector::class("cmt_write_box"))
        .and_then(|el| el.find(Selector::tag("input").with_attr("name", "comment_code")))
        .is_some();
    let downvote_disabled = markup::find(body, Selector::class("icon_recom_down")).is_none();

    let comment_anchor_id = ANCHOR_ID_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    let comment_anchor_no = ANCHOR_NO_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    Ok(PostRecord {
        id: id.to_string(),
        header,
        title,
        date,
        expire_at,
        author,
        view_count,
        upvotes,
        fixed_upvotes,
        downvotes,
        body_html,
        comment_anchor_id,
        comment_anchor_no,
        is_notice,
        is_adult_gated,
        requires_vote_captcha,
        requires_comment_captcha,
        downvote_disabled,
        raw_document: body.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>t</title></head><body>
    <div class="view_content_wrap">
      <header><div class="gallview_head">
        <span class="title_headtext">[일반]</span>
        <span class="title_subject">Rust question</span>
        <div class="gall_writer ub-writer" data-nick="ferris" data-uid="crab01" data-ip="">
        </div>
        <div class="fl"><span class="gall_date" title="2024.01.31 12:34:56">2024.01.31 12:34:56</span>
          <span class="mini_autodeltime"><div class="pop_tipbox"><div>2024.02.01 00:00:00 자동 삭제</div></div></span>
        </div>
        <div class="fr"><span class="gall_count">조회 1234</span><span class="gall_reply_num">추천 12</span></div>
      </div></header>
      <div class="writing_view_box"><div class="write_div" style="width:900px">body <div>nested</div></div></div>
      <div class="btn_recommend_box"><p class="up_num">12</p><p class="sup_num"><span class="smallnum">3</span></p><p class="down_num">1</p><em class="icon_recom_down"></em></div>
      <div class="recommend_kapcode"></div>
    </div>
    <input type="hidden" id="e_s_n_o" value="secret01">
    <div class="user_control"><ul class="option_box"><li>공지 등록</li><li>삭제</li></ul></div>
    <script>$(document).data('comment_id', 'issuezoom');
    $(document).data('comment_no', '555');</script>
    </body></html>"#;

    #[test]
    fn parses_structural_anchors() {
        let post = parse_post_page("123", PAGE).unwrap();
        assert_eq!(post.header.as_deref(), Some("일반"));
        assert_eq!(post.title.as_deref(), Some("Rust question"));
        assert_eq!(post.date.as_deref(), Some("2024.01.31 12:34:56"));
        assert_eq!(post.expire_at.as_deref(), Some("2024.02.01 00:00:00"));
        assert_eq!(post.view_count.as_deref(), Some("1234"));
        assert_eq!(post.upvotes.as_deref(), Some("12"));
        assert_eq!(post.fixed_upvotes.as_deref(), Some("3"));
        assert_eq!(post.downvotes.as_deref(), Some("1"));
        assert_eq!(post.author.nick, "ferris");
        assert_eq!(post.author.uid.as_deref(), Some("crab01"));
        assert_eq!(post.author.ip, None);
        assert!(post.body_html.unwrap().contains("<div>nested</div>"));
        assert!(!post.is_notice);
        assert!(!post.is_adult_gated);
        assert!(post.requires_vote_captcha);
        assert!(!post.requires_comment_captcha);
        assert!(!post.downvote_disabled);
    }

    #[test]
    fn comment_anchor_from_inline_script() {
        let post = parse_post_page("123", PAGE).unwrap();
        let target = PreviewTarget::from_link("/board/view/?id=rust&no=123").unwrap();
        let anchor = post.comment_anchor(&target);
        assert_eq!(anchor.gallery, "issuezoom");
        assert_eq!(anchor.post_id, "555");
    }

    #[test]
    fn comment_anchor_defaults_to_post() {
        let page = "<div class=\"title_subject\">x</div>";
        let post = parse_post_page("9", page).unwrap();
        let target = PreviewTarget::from_link("/board/view/?id=rust&no=9").unwrap();
        let anchor = post.comment_anchor(&target);
        assert_eq!(anchor, CommentAnchor { gallery: "rust".into(), post_id: "9".into() });
        assert!(post.downvote_disabled);
    }

    #[test]
    fn adult_gate_detected_in_head() {
        let page = "<html><head><script>location.href='/error/adult?x'</script></head><body></body></html>";
        let post = parse_post_page("1", page).unwrap();
        assert!(post.is_adult_gated);
    }

    #[test]
    fn non_post_page_fails_to_parse() {
        let err = parse_post_page("1", "<html><body>gone</body></html>").unwrap_err();
        assert!(matches!(err, GatewayError::Parse(_)));
    }

    #[test]
    fn form_secret_from_hidden_input() {
        let post = parse_post_page("123", PAGE).unwrap();
        assert_eq!(post.form_secret().as_deref(), Some("secret01"));
        let bare = parse_post_page("9", "<div class=\"title_subject\">x</div>").unwrap();
        assert_eq!(bare.form_secret(), None);
    }

    #[test]
    fn page_dates_parse() {
        let post = parse_post_page("123", PAGE).unwrap();
        let posted = post.posted_at().unwrap();
        assert_eq!(posted.format("%Y-%m-%d %H:%M").to_string(), "2024-01-31 12:34");
        assert!(post.expires_at().is_some());
        assert_eq!(post.views_label().as_deref(), Some("조회 1234회"));
    }
}
