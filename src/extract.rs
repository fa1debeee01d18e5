use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static META_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("meta").unwrap());
static BODY_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Elements whose text never counts as page content.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageFields {
    pub title: String,
    pub meta_description: String,
    pub body_text: String,
}

pub trait Extract: Send + Sync {
    fn extract(&self, html: &str) -> PageFields;
}

/// Title, meta description and visible body text from rendered markup.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

impl Extract for HtmlExtractor {
    fn extract(&self, html: &str) -> PageFields {
        let doc = Html::parse_document(html);
        PageFields {
            title: title(&doc),
            meta_description: meta_description(&doc),
            body_text: body_text(&doc),
        }
    }
}

fn title(doc: &Html) -> String {
    doc.select(&TITLE_SEL)
        .next()
        .map(|t| collapse_ws(&t.text().collect::<String>()))
        .unwrap_or_default()
}

fn meta_description(doc: &Html) -> String {
    let meta_content = |attr: &str, want: &str| {
        doc.select(&META_SEL)
            .find(|m| {
                m.value()
                    .attr(attr)
                    .is_some_and(|v| v.trim().eq_ignore_ascii_case(want))
            })
            .and_then(|m| m.value().attr("content"))
            .map(collapse_ws)
    };

    meta_content("name", "description")
        .or_else(|| meta_content("property", "og:description"))
        .unwrap_or_default()
}

fn body_text(doc: &Html) -> String {
    let root: ElementRef = doc
        .select(&BODY_SEL)
        .next()
        .unwrap_or_else(|| doc.root_element());

    let mut parts: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            matches!(a.value(), Node::Element(e) if SKIPPED_TAGS.contains(&e.name()))
        });
        if !hidden {
            parts.push(text);
        }
    }
    collapse_ws(&parts.join(" "))
}

fn collapse_ws(s: &str) -> String {
    WS_RE.replace_all(s, " ").trim().to_string()
}
