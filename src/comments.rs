use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::collab::{BlockCategory, BlockPredicate};
use crate::error::GatewayResult;
use crate::markup::{self, Selector};
use crate::post::Author;

/// Nick type of the automated entries that are never shown.
pub const HIDDEN_NICK_TYPE: &str = "COMMENT_BOY";

static MEDIA_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(img|video) class=").expect("valid media tag regex"));
static STICKER_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://dcimg5\.dcinside\.com/dccon\.php\?no=(\w*)").expect("valid sticker regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEntry {
    pub id: String,
    pub depth: u32,
    pub author: Author,
    pub body_html: String,
    pub media_reference: Option<String>,
    /// Gallog icon image of the author, when the server renders one.
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentThread {
    pub total_count: i64,
    pub entries: Vec<CommentEntry>,
}

impl CommentThread {
    /// Top-level comments among the visible entries.
    pub fn thread_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.depth == 0).count()
    }

    /// Pane subtitle: the thread breakdown is shown only when it differs from the total.
    pub fn subtitle(&self) -> String {
        let threads = self.thread_count() as i64;
        if threads != self.total_count {
            format!("쓰레드 {threads}개, 총 댓글 {}개", self.total_count)
        } else {
            format!("{}개", self.total_count)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawThread {
    #[serde(default, deserialize_with = "lenient_i64")]
    total_cnt: i64,
    #[serde(default)]
    comments: Option<Vec<RawComment>>,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    #[serde(deserialize_with = "lenient_string")]
    no: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    depth: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    memo: String,
    #[serde(default)]
    nicktype: Option<String>,
    #[serde(default)]
    gallog_icon: Option<String>,
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Parses the comment endpoint's JSON body without filtering.
pub fn parse_comment_body(body: &str) -> GatewayResult<CommentThread> {
    let raw: RawThread = serde_json::from_str(body)?;
    let entries = raw
        .comments
        .unwrap_or_default()
        .into_iter()
        .filter(|c| c.nicktype.as_deref() != Some(HIDDEN_NICK_TYPE))
        .map(into_entry)
        .collect();
    Ok(CommentThread {
        total_count: raw.total_cnt,
        entries,
    })
}

fn into_entry(raw: RawComment) -> CommentEntry {
    let media_reference = if MEDIA_TAG_RE.is_match(&raw.memo) {
        STICKER_CODE_RE
            .captures(&raw.memo)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .or(Some(String::new()))
    } else {
        None
    };
    let icon = raw.gallog_icon.as_deref().and_then(|html| {
        markup::find(html, Selector::class("writer_nikcon"))
            .and_then(|anchor| anchor.find(Selector::tag("img")))
            .and_then(|img| img.attr("src"))
            .map(str::to_string)
    });
    CommentEntry {
        id: raw.no,
        depth: raw.depth.max(0) as u32,
        author: Author {
            nick: raw.name,
            uid: raw.user_id.filter(|v| !v.is_empty()),
            ip: raw.ip.filter(|v| !v.is_empty()),
        },
        body_html: raw.memo,
        media_reference,
        icon,
    }
}

/// Drops entries the block predicate matches on author or content. `total_count`
/// keeps the server's figure; only the visible breakdown shrinks.
pub fn filter_blocked(
    thread: &CommentThread,
    block: &dyn BlockPredicate,
    scope: Option<&str>,
) -> CommentThread {
    let entries = thread
        .entries
        .iter()
        .filter(|entry| !block.check_all(&block_values(entry), scope))
        .cloned()
        .collect();
    CommentThread {
        total_count: thread.total_count,
        entries,
    }
}

fn block_values(entry: &CommentEntry) -> Vec<(BlockCategory, String)> {
    let mut values = vec![(BlockCategory::Nick, entry.author.nick.clone())];
    if let Some(uid) = &entry.author.uid {
        values.push((BlockCategory::Id, uid.clone()));
    }
    if let Some(ip) = &entry.author.ip {
        values.push((BlockCategory::Ip, ip.clone()));
    }
    match &entry.media_reference {
        Some(code) => values.push((BlockCategory::Dccon, code.clone())),
        None => values.push((BlockCategory::Comment, entry.body_html.clone())),
    }
    values
}
