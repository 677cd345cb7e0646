//! The flowed-content side of the document.
//!
//! Tables and images keep their structure in the rich-text markup. Each such
//! node carries an `id` attribute equal to its `PageObject` id plus `data-*`
//! attributes with the placement metadata, so the object store can act as an
//! index over content nodes.

use std::sync::OnceLock;

use regex::Regex;

pub const OBJECT_TYPE_ATTR: &str = "data-object-type";
pub const MODE_ATTR: &str = "data-mode";
pub const X_ATTR: &str = "data-x";
pub const Y_ATTR: &str = "data-y";

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Boundary to the rich-text editing surface. Hosts implement the four
/// content methods; node-level attribute access has default implementations
/// that work on the markup.
pub trait EditorSurface {
    fn content(&self) -> String;

    fn set_content(&mut self, markup: &str);

    /// Runs an inline formatting command. Returns `false` when unsupported.
    fn exec_command(&mut self, command: &str, value: Option<&str>) -> bool;

    /// Replaces the current selection with `markup` and leaves the caret after it.
    fn insert_at_caret(&mut self, markup: &str);

    fn has_node(&self, id: &str) -> bool {
        find_element(&self.content(), id).is_some()
    }

    fn node_attribute(&self, id: &str, name: &str) -> Option<String> {
        let content = self.content();
        let span = find_element(&content, id)?;
        attribute(&content[span.start..span.open_end], name)
    }

    fn set_node_attribute(&mut self, id: &str, name: &str, value: Option<&str>) -> bool {
        match set_element_attribute(&self.content(), id, name, value) {
            Some(updated) => {
                self.set_content(&updated);
                true
            }
            None => false,
        }
    }

    fn remove_node(&mut self, id: &str) -> bool {
        match remove_element(&self.content(), id) {
            Some(updated) => {
                self.set_content(&updated);
                true
            }
            None => false,
        }
    }
}

/// In-memory editing surface: a markup buffer with a selection.
#[derive(Clone, Debug, Default)]
pub struct MarkupSurface {
    markup: String,
    selection: (usize, usize),
}

impl MarkupSurface {
    pub fn new(markup: &str) -> Self {
        Self {
            markup: markup.to_string(),
            selection: (markup.len(), markup.len()),
        }
    }

    pub fn selection(&self) -> (usize, usize) {
        self.selection
    }

    /// Byte offsets; snapped to char boundaries and moved out of tags.
    pub fn set_selection(&mut self, start: usize, end: usize) {
        let a = self.snap(start.min(end));
        let b = self.snap(start.max(end));
        self.selection = (a, b.max(a));
    }

    pub fn set_caret(&mut self, offset: usize) {
        self.set_selection(offset, offset);
    }

    fn snap(&self, offset: usize) -> usize {
        let mut offset = offset.min(self.markup.len());
        while !self.markup.is_char_boundary(offset) {
            offset += 1;
        }
        let before = &self.markup[..offset];
        if let Some(lt) = before.rfind('<')
            && before[lt..].find('>').is_none()
            && let Some(gt) = self.markup[offset..].find('>')
        {
            offset += gt + 1;
        }
        offset
    }

    fn wrap_selection(&mut self, open: &str, close: &str) {
        let (start, end) = self.selection;
        let inner = self.markup[start..end].to_string();
        let wrapped = format!("{open}{inner}{close}");
        self.markup.replace_range(start..end, &wrapped);
        self.selection = (start, start + wrapped.len());
    }
}

impl EditorSurface for MarkupSurface {
    fn content(&self) -> String {
        self.markup.clone()
    }

    fn set_content(&mut self, markup: &str) {
        self.markup = markup.to_string();
        let (start, end) = self.selection;
        self.set_selection(start, end);
    }

    fn exec_command(&mut self, command: &str, value: Option<&str>) -> bool {
        match command {
            "bold" => self.wrap_selection("<strong>", "</strong>"),
            "italic" => self.wrap_selection("<em>", "</em>"),
            "underline" => self.wrap_selection("<u>", "</u>"),
            "insertHTML" => match value {
                Some(markup) => self.insert_at_caret(markup),
                None => return false,
            },
            "insertText" => match value {
                Some(text) => self.insert_at_caret(&escape_html(text)),
                None => return false,
            },
            _ => {
                log::debug!("Unsupported editor command: {command}");
                return false;
            }
        }
        true
    }

    fn insert_at_caret(&mut self, markup: &str) {
        let (start, end) = self.selection;
        self.markup.replace_range(start..end, markup);
        let caret = start + markup.len();
        self.selection = (caret, caret);
    }
}

/// Byte range of one element: `start..open_end` is the opening tag,
/// `start..end` the whole element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementSpan {
    pub start: usize,
    pub open_end: usize,
    pub end: usize,
}

/// An opening tag found while scanning markup.
#[derive(Clone, Debug, PartialEq)]
pub struct TaggedElement {
    pub tag: String,
    pub id: Option<String>,
    pub span: ElementSpan,
}

/// The body of a tag up to its `>`; quoted attribute values may hold `>`.
const TAG_BODY: &str = r#"(?:[^>"']|"[^"]*"|'[^']*')*"#;

fn open_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"<([A-Za-z][A-Za-z0-9]*)\b{TAG_BODY}>")).expect("valid regex")
    })
}

/// Byte offset just past the first tag's closing `>`, skipping quoted values.
pub fn open_tag_end(markup: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in markup.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(i + 1),
            (None, _) => {}
        }
    }
    None
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\s([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("valid regex")
    })
}

fn element_end(markup: &str, tag: &str, open_end: usize, self_closing: bool) -> usize {
    let lower = tag.to_ascii_lowercase();
    if self_closing || VOID_TAGS.contains(&lower.as_str()) {
        return open_end;
    }
    let Ok(re) = Regex::new(&format!(r"(?i)<(/?){}\b{TAG_BODY}>", regex::escape(&lower))) else {
        return markup.len();
    };
    let mut depth = 1usize;
    for caps in re.captures_iter(&markup[open_end..]) {
        let whole = caps.get(0).map(|m| (m.end(), m.as_str()));
        let Some((end, text)) = whole else { continue };
        if caps.get(1).is_some_and(|m| !m.as_str().is_empty()) {
            depth -= 1;
            if depth == 0 {
                return open_end + end;
            }
        } else if !text.ends_with("/>") {
            depth += 1;
        }
    }
    markup.len()
}

/// Every opening tag in document order.
pub fn elements(markup: &str) -> Vec<TaggedElement> {
    open_tag_regex()
        .captures_iter(markup)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let tag = caps.get(1)?.as_str().to_string();
            let text = whole.as_str();
            let end = element_end(markup, &tag, whole.end(), text.ends_with("/>"));
            Some(TaggedElement {
                id: attribute(text, "id"),
                tag,
                span: ElementSpan {
                    start: whole.start(),
                    open_end: whole.end(),
                    end,
                },
            })
        })
        .collect()
}

pub fn find_element(markup: &str, id: &str) -> Option<ElementSpan> {
    for caps in open_tag_regex().captures_iter(markup) {
        let (Some(whole), Some(tag)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if attribute(whole.as_str(), "id").as_deref() != Some(id) {
            continue;
        }
        let end = element_end(markup, tag.as_str(), whole.end(), whole.as_str().ends_with("/>"));
        return Some(ElementSpan {
            start: whole.start(),
            open_end: whole.end(),
            end,
        });
    }
    None
}

pub fn element_markup<'a>(markup: &'a str, id: &str) -> Option<&'a str> {
    find_element(markup, id).map(|span| &markup[span.start..span.end])
}

/// Reads an attribute from an opening tag.
pub fn attribute(tag: &str, name: &str) -> Option<String> {
    attr_regex().captures_iter(tag).find_map(|caps| {
        let key = caps.get(1)?.as_str();
        if !key.eq_ignore_ascii_case(name) {
            return None;
        }
        let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        Some(decode_entities(value))
    })
}

/// Rewrites an opening tag with `name` set to `value`, or removed when `value` is `None`.
/// An existing attribute is replaced where it stands.
pub fn set_attribute_in_tag(tag: &str, name: &str, value: Option<&str>) -> String {
    let mut result = String::with_capacity(tag.len() + 32);
    let mut last = 0;
    let mut written = false;
    for caps in attr_regex().captures_iter(tag) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if !key.as_str().eq_ignore_ascii_case(name) {
            continue;
        }
        result.push_str(&tag[last..whole.start()]);
        last = whole.end();
        if let Some(value) = value.filter(|_| !written) {
            result.push_str(&format!(" {name}=\"{}\"", escape_attr(value)));
            written = true;
        }
    }
    result.push_str(&tag[last..]);

    if let Some(value) = value.filter(|_| !written) {
        let insert_at = if result.ends_with("/>") {
            result.len() - 2
        } else {
            result.len() - 1
        };
        let trimmed = result[..insert_at].trim_end().len();
        let attr = format!(" {name}=\"{}\"", escape_attr(value));
        let tail = result[insert_at..].to_string();
        result.truncate(trimmed);
        result.push_str(&attr);
        if tail.starts_with("/>") {
            result.push(' ');
        }
        result.push_str(&tail);
    }
    result
}

pub fn set_element_attribute(
    markup: &str,
    id: &str,
    name: &str,
    value: Option<&str>,
) -> Option<String> {
    let span = find_element(markup, id)?;
    let tag = set_attribute_in_tag(&markup[span.start..span.open_end], name, value);
    let mut updated = String::with_capacity(markup.len() + tag.len());
    updated.push_str(&markup[..span.start]);
    updated.push_str(&tag);
    updated.push_str(&markup[span.open_end..]);
    Some(updated)
}

pub fn remove_element(markup: &str, id: &str) -> Option<String> {
    let span = find_element(markup, id)?;
    let mut updated = String::with_capacity(markup.len());
    updated.push_str(&markup[..span.start]);
    updated.push_str(&markup[span.end..]);
    Some(updated)
}

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

pub fn escape_attr(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp..];
        let Some(semi) = after.find(';').filter(|&i| i <= 10) else {
            out.push('&');
            rest = &after[1..];
            continue;
        };
        let entity = &after[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse::<u32>().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nested_element_by_id() {
        let markup = r#"<p>a</p><div id="t"><div>x</div><img src="a.png"></div><p>b</p>"#;
        let span = find_element(markup, "t").unwrap();
        assert_eq!(
            &markup[span.start..span.end],
            r#"<div id="t"><div>x</div><img src="a.png"></div>"#
        );
    }

    #[test]
    fn quoted_angle_brackets_do_not_end_a_tag() {
        let markup = r#"<p title="a>b"><table id="t" data-note='x > y'><tr><td>1</td></tr></table></p>"#;
        let span = find_element(markup, "t").unwrap();
        assert_eq!(&markup[span.start..span.open_end], r#"<table id="t" data-note='x > y'>"#);
        assert!(markup[span.start..span.end].ends_with("</table>"));
        let tags: Vec<String> = elements(markup).into_iter().map(|e| e.tag).collect();
        assert_eq!(tags, ["p", "table", "tr", "td"]);
        assert_eq!(open_tag_end(r#"<img alt="1>0" src="a.png"/>tail"#), Some(28));
    }

    #[test]
    fn void_element_ends_at_open_tag() {
        let markup = r#"<p><img id="i1" src="x.png">tail</p>"#;
        assert_eq!(element_markup(markup, "i1"), Some(r#"<img id="i1" src="x.png">"#));
    }

    #[test]
    fn sets_replaces_and_removes_attributes() {
        let tag = r#"<img id="i1" data-mode="inline"/>"#;
        let set = set_attribute_in_tag(tag, "data-mode", Some("floating"));
        assert_eq!(attribute(&set, "data-mode").as_deref(), Some("floating"));
        assert!(set.ends_with("/>"));
        let removed = set_attribute_in_tag(&set, "data-mode", None);
        assert_eq!(attribute(&removed, "data-mode"), None);
        assert_eq!(attribute(&removed, "id").as_deref(), Some("i1"));
    }

    #[test]
    fn replacing_keeps_attribute_order() {
        let tag = r#"<img id="i1" width="300" alt=""/>"#;
        assert_eq!(
            set_attribute_in_tag(tag, "width", Some("120")),
            r#"<img id="i1" width="120" alt=""/>"#
        );
    }

    #[test]
    fn attribute_values_are_escaped_and_decoded() {
        let tag = set_attribute_in_tag("<p>", "title", Some(r#"a "b" & c"#));
        assert_eq!(tag, r#"<p title="a &quot;b&quot; &amp; c">"#);
        assert_eq!(attribute(&tag, "title").as_deref(), Some(r#"a "b" & c"#));
    }

    #[test]
    fn caret_never_lands_inside_a_tag() {
        let mut surface = MarkupSurface::new("<p>hello</p>");
        surface.set_caret(1);
        assert_eq!(surface.selection(), (3, 3));
    }

    #[test]
    fn bold_wraps_selection() {
        let mut surface = MarkupSurface::new("<p>hello</p>");
        surface.set_selection(3, 8);
        assert!(surface.exec_command("bold", None));
        assert_eq!(surface.content(), "<p><strong>hello</strong></p>");
        assert!(!surface.exec_command("justifyFull", None));
    }

    #[test]
    fn decodes_numeric_entities() {
        assert_eq!(decode_entities("a&#160;b&#x41;&amp;&bogus"), "a\u{a0}bA&&bogus");
    }
}
