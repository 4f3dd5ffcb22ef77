//! Minimal structural lookups over server-rendered markup.
//!
//! The post page is scraped through a handful of fixed class anchors, so a full DOM is
//! not needed: elements are located by tag and class token, and their extent is found
//! by counting nested tags of the same name.

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<(/?)([a-zA-Z][a-zA-Z0-9]*)\b((?:[^>"']|"[^"]*"|'[^']*')*)>"#)
        .expect("valid tag regex")
});
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#)
        .expect("valid attribute regex")
});
static STRIP_TAGS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid strip regex"));

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// An element located in a document slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    pub tag: &'a str,
    attrs: &'a str,
    pub inner: &'a str,
}

impl<'a> Element<'a> {
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        attribute(self.attrs, name)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|value| value.split_whitespace().any(|token| token == class))
            .unwrap_or(false)
    }

    /// First descendant matching the selector.
    pub fn find(&self, selector: Selector<'_>) -> Option<Element<'a>> {
        find(self.inner, selector)
    }

    /// Inner markup, trimmed.
    pub fn html(&self) -> String {
        self.inner.trim().to_string()
    }

    /// Inner text with tags removed, trimmed.
    pub fn text(&self) -> String {
        strip_tags(self.inner)
    }
}

/// A `tag.class` selector; either half may be omitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Selector<'s> {
    pub tag: Option<&'s str>,
    pub class: Option<&'s str>,
    pub attr: Option<(&'s str, &'s str)>,
}

impl<'s> Selector<'s> {
    pub fn class(class: &'s str) -> Self {
        Self {
            class: Some(class),
            ..Self::default()
        }
    }

    pub fn tag(tag: &'s str) -> Self {
        Self {
            tag: Some(tag),
            ..Self::default()
        }
    }

    pub fn tag_class(tag: &'s str, class: &'s str) -> Self {
        Self {
            tag: Some(tag),
            class: Some(class),
            attr: None,
        }
    }

    pub fn with_attr(mut self, name: &'s str, value: &'s str) -> Self {
        self.attr = Some((name, value));
        self
    }
}

/// Finds the first element in `doc` matching `selector`.
pub fn find<'a>(doc: &'a str, selector: Selector<'_>) -> Option<Element<'a>> {
    for caps in TAG_RE.captures_iter(doc) {
        if !caps[1].is_empty() {
            continue;
        }
        let (Some(whole), Some(tag), Some(attrs)) = (caps.get(0), caps.get(2), caps.get(3)) else {
            continue;
        };
        if let Some(wanted) = selector.tag {
            if !tag.as_str().eq_ignore_ascii_case(wanted) {
                continue;
            }
        }
        let candidate = Element {
            tag: tag.as_str(),
            attrs: attrs.as_str(),
            inner: "",
        };
        if let Some(class) = selector.class {
            if !candidate.has_class(class) {
                continue;
            }
        }
        if let Some((name, value)) = selector.attr {
            if candidate.attr(name) != Some(value) {
                continue;
            }
        }
        let self_closing = attrs.as_str().trim_end().ends_with('/');
        let inner = if self_closing || is_void(tag.as_str()) {
            ""
        } else {
            inner_extent(doc, whole.end(), tag.as_str())
        };
        return Some(Element { inner, ..candidate });
    }
    None
}

/// Follows a chain of selectors, each matched inside the previous element.
pub fn find_path<'a>(doc: &'a str, path: &[Selector<'_>]) -> Option<Element<'a>> {
    let (first, rest) = path.split_first()?;
    let mut current = find(doc, *first)?;
    for selector in rest {
        current = current.find(*selector)?;
    }
    Some(current)
}

pub fn strip_tags(markup: &str) -> String {
    STRIP_TAGS_RE.replace_all(markup, "").trim().to_string()
}

fn is_void(tag: &str) -> bool {
    VOID_TAGS.iter().any(|void| tag.eq_ignore_ascii_case(void))
}

/// Slice between `start` and the close tag balancing the element opened just before it.
/// Unclosed elements extend to the end of the document.
fn inner_extent<'a>(doc: &'a str, start: usize, tag: &str) -> &'a str {
    let rest = &doc[start..];
    let mut depth = 1usize;
    for caps in TAG_RE.captures_iter(rest) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        if !name.as_str().eq_ignore_ascii_case(tag) {
            continue;
        }
        if caps[1].is_empty() {
            if !caps[3].trim_end().ends_with('/') {
                depth += 1;
            }
        } else {
            depth -= 1;
            if depth == 0 {
                return &rest[..whole.start()];
            }
        }
    }
    rest
}

fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    ATTR_RE.captures_iter(attrs).find_map(|caps| {
        let key = caps.get(1)?;
        if !key.as_str().eq_ignore_ascii_case(name) {
            return None;
        }
        let raw = caps.get(2)?.as_str();
        Some(raw.trim_matches(|c| c == '"' || c == '\''))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
        <div class="outer box">
          <div class="inner"><span class="title_subject">Hi <b>there</b></span></div>
          <div class="inner second">two</div>
          <input type="text" name="comment_code">
        </div>
        <p data-nick='neo' data-uid="n1">tail</p>
    "#;

    #[test]
    fn finds_nested_element_with_balanced_extent() {
        let outer = find(DOC, Selector::tag_class("div", "box")).unwrap();
        assert!(outer.inner.contains("second"));
        assert!(!outer.inner.contains("tail"));
        let subject = outer.find(Selector::class("title_subject")).unwrap();
        assert_eq!(subject.html(), "Hi <b>there</b>");
        assert_eq!(subject.text(), "Hi there");
    }

    #[test]
    fn class_match_is_token_based() {
        assert!(find(DOC, Selector::class("inn")).is_none());
        let second = find(DOC, Selector::class("second")).unwrap();
        assert_eq!(second.text(), "two");
    }

    #[test]
    fn attributes_and_void_elements() {
        let input = find(DOC, Selector::tag("input").with_attr("name", "comment_code")).unwrap();
        assert_eq!(input.inner, "");
        let p = find(DOC, Selector::tag("p")).unwrap();
        assert_eq!(p.attr("data-nick"), Some("neo"));
        assert_eq!(p.attr("data-uid"), Some("n1"));
        assert_eq!(p.attr("data-ip"), None);
    }

    #[test]
    fn path_lookup() {
        let found = find_path(
            DOC,
            &[Selector::class("outer"), Selector::class("inner"), Selector::tag("b")],
        )
        .unwrap();
        assert_eq!(found.text(), "there");
    }
}
