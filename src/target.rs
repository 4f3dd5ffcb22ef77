use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

const NOTICE_LABEL: &str = "공지";
const PROMOTED_ICON_CLASS: &str = "icon_recomimg";

/// What a gesture resolved to: the post to preview and how it was listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewTarget {
    pub gallery: String,
    pub post_id: String,
    pub link: String,
    pub title: String,
    pub is_notice: bool,
    pub is_promoted: bool,
}

/// The parts of a list row that target resolution looks at. The filter collaborator
/// extracts these from the element and its ancestors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListEntry {
    /// Text of the row's number cell, absent for rows outside the main list.
    pub number_text: Option<String>,
    /// Href of the row's primary anchor (the reply-count anchor excluded).
    pub href: Option<String>,
    pub title: String,
    /// Class list of the row's icon element, if any.
    pub icon_classes: Vec<String>,
}

static LINK_NO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&no=([^&]+)").expect("valid post number regex"));
static LINK_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"id=([^&]+)").expect("valid gallery id regex"));

impl PreviewTarget {
    /// Resolves a list row into a target. Rows without a usable link yield `None`.
    pub fn resolve(entry: &ListEntry) -> Option<Self> {
        let mut post_id = String::new();
        let mut is_notice = false;

        if let Some(number) = entry.number_text.as_deref() {
            if number.trim() == NOTICE_LABEL {
                is_notice = true;
                post_id = entry
                    .href
                    .as_deref()
                    .and_then(|href| query_value(href, "no"))
                    .unwrap_or_default();
            } else {
                post_id = number.trim().to_string();
            }
        }

        let is_promoted = entry
            .icon_classes
            .iter()
            .any(|class| class == PROMOTED_ICON_CLASS);

        let link = entry.href.clone()?;
        let (gallery, linked_id) = parse_link(&link)?;
        if !linked_id.is_empty() {
            post_id = linked_id;
        }

        Some(Self {
            gallery,
            post_id,
            link,
            title: entry.title.trim().to_string(),
            is_notice,
            is_promoted,
        })
    }

    /// Builds a target straight from a post URL.
    pub fn from_link(link: &str) -> Option<Self> {
        let (gallery, post_id) = parse_link(link)?;
        Some(Self {
            gallery,
            post_id,
            link: link.to_string(),
            title: String::new(),
            is_notice: false,
            is_promoted: false,
        })
    }

    /// Cache key shared by the post and comment panes.
    pub fn cache_key(&self) -> String {
        format!("{}{}", self.gallery, self.post_id)
    }

    /// Numeric post id, when the id is numeric.
    pub fn numeric_id(&self) -> Option<i64> {
        self.post_id.parse().ok()
    }

    /// Target for a neighbouring post. The link's `no` parameter is rewritten and the
    /// listing flags are dropped since they describe the original row.
    pub fn with_post_id(&self, post_id: &str) -> Self {
        Self {
            gallery: self.gallery.clone(),
            post_id: post_id.to_string(),
            link: replace_post_number(&self.link, post_id),
            title: String::new(),
            is_notice: false,
            is_promoted: false,
        }
    }
}

/// Extracts `(gallery, post id)` from a view link.
pub fn parse_link(link: &str) -> Option<(String, String)> {
    let no = LINK_NO_RE.captures(link)?.get(1)?.as_str().to_string();
    let id = LINK_ID_RE.captures(link)?.get(1)?.as_str().to_string();
    Some((id, no))
}

fn query_value(href: &str, key: &str) -> Option<String> {
    let parsed = Url::parse(href)
        .or_else(|_| Url::parse("https://localhost/").and_then(|base| base.join(href)))
        .ok()?;
    parsed
        .query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

fn replace_post_number(link: &str, post_id: &str) -> String {
    if LINK_NO_RE.is_match(link) {
        LINK_NO_RE
            .replace(link, format!("&no={post_id}").as_str())
            .into_owned()
    } else if link.contains('?') {
        format!("{link}&no={post_id}")
    } else {
        format!("{link}?no={post_id}")
    }
}

/// Gallery flavour, derived from the path of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalleryKind {
    Major,
    Minor,
    Mini,
}

impl GalleryKind {
    pub fn from_link(link: &str) -> Self {
        if link.contains("/mgallery/") {
            GalleryKind::Minor
        } else if link.contains("/mini/") {
            GalleryKind::Mini
        } else {
            GalleryKind::Major
        }
    }

    /// Value of the `_GALLTYPE_` form parameter.
    pub fn type_name(self) -> &'static str {
        match self {
            GalleryKind::Major => "G",
            GalleryKind::Minor => "M",
            GalleryKind::Mini => "MI",
        }
    }

    /// Path prefix in front of `board/`.
    pub fn path_prefix(self) -> &'static str {
        match self {
            GalleryKind::Major => "",
            GalleryKind::Minor => "mgallery/",
            GalleryKind::Mini => "mini/",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(number: &str, href: &str) -> ListEntry {
        ListEntry {
            number_text: Some(number.into()),
            href: Some(href.into()),
            title: " Hello ".into(),
            icon_classes: vec!["icon_img".into()],
        }
    }

    #[test]
    fn resolves_regular_row() {
        let target = PreviewTarget::resolve(&row(
            "123",
            "https://gall.dcinside.com/board/view/?id=rust&no=123&page=1",
        ))
        .unwrap();
        assert_eq!(target.gallery, "rust");
        assert_eq!(target.post_id, "123");
        assert_eq!(target.title, "Hello");
        assert!(!target.is_notice);
        assert!(!target.is_promoted);
        assert_eq!(target.cache_key(), "rust123");
    }

    #[test]
    fn notice_row_takes_id_from_href() {
        let mut entry = row("공지", "/board/view/?id=rust&no=77");
        entry.icon_classes.push(PROMOTED_ICON_CLASS.into());
        let target = PreviewTarget::resolve(&entry).unwrap();
        assert!(target.is_notice);
        assert!(target.is_promoted);
        assert_eq!(target.post_id, "77");
    }

    #[test]
    fn row_without_post_number_is_ignored() {
        assert!(PreviewTarget::resolve(&row("1", "/board/lists/?id=rust")).is_none());
        let mut entry = row("1", "");
        entry.href = None;
        assert!(PreviewTarget::resolve(&entry).is_none());
    }

    #[test]
    fn neighbour_rewrites_link() {
        let target = PreviewTarget::from_link("/mgallery/board/view/?id=rust&no=10&page=2").unwrap();
        let next = target.with_post_id("11");
        assert_eq!(next.link, "/mgallery/board/view/?id=rust&no=11&page=2");
        assert_eq!(next.numeric_id(), Some(11));
    }

    #[test]
    fn gallery_kind_from_link() {
        assert_eq!(GalleryKind::from_link("/mgallery/board/view/?id=a&no=1").type_name(), "M");
        assert_eq!(GalleryKind::from_link("/mini/board/view/?id=a&no=1").type_name(), "MI");
        assert_eq!(GalleryKind::from_link("/board/view/?id=a&no=1").type_name(), "G");
    }
}
