//! Single-pass scanner for XML-ish elements embedded in free text.
//!
//! Only the tag names asked for are recognized; everything else, including
//! malformed or unterminated elements, is treated as plain text. Matches are
//! returned in source order and never overlap: once an element is accepted,
//! scanning resumes after its end.

use std::ops::Range;

/// A well-formed element found in the text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element<'a> {
    pub name: &'a str,
    /// Attribute values with entities decoded, in source order.
    pub attributes: Vec<(&'a str, String)>,
    /// Raw body between open and close tags; `None` when self-closing.
    pub body: Option<&'a str>,
    /// Byte range of the whole element, tags included.
    pub span: Range<usize>,
}

impl Element<'_> {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value trimmed, `None` when absent or blank.
    pub fn required_attr(&self, key: &str) -> Option<String> {
        self.attr(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn is_self_closing(&self) -> bool {
        self.body.is_none()
    }
}

/// A value extracted from an element, with the element's source position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub value: T,
    pub span: Range<usize>,
}

/// All well-formed elements with one of `names`, in source order.
pub fn scan<'a>(text: &'a str, names: &[&str]) -> Vec<Element<'a>> {
    scan_with(text, names, |el| Some(el.clone()))
        .into_iter()
        .map(|s| s.value)
        .collect()
}

/// Scan and convert in one pass. When `accept` rejects an element, scanning
/// continues from the character after its `<`, so elements nested in a
/// rejected one can still match.
pub fn scan_with<'a, T>(
    text: &'a str,
    names: &[&str],
    mut accept: impl FnMut(&Element<'a>) -> Option<T>,
) -> Vec<Spanned<T>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(rel) = text[pos..].find('<') {
        let start = pos + rel;
        if let Some(el) = parse_element(text, start, names) {
            if let Some(value) = accept(&el) {
                pos = el.span.end;
                out.push(Spanned { value, span: el.span });
                continue;
            }
        }
        pos = start + 1;
    }
    out
}

/// Replace every accepted element with the string `replace` returns for it.
pub fn rewrite(text: &str, names: &[&str], replace: impl FnMut(&Element<'_>) -> Option<String>) -> String {
    let matches = scan_with(text, names, replace);
    if matches.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in matches {
        out.push_str(&text[last..m.span.start]);
        out.push_str(&m.value);
        last = m.span.end;
    }
    out.push_str(&text[last..]);
    out
}

/// Remove the given non-overlapping, ordered byte ranges.
pub fn remove_spans<'r>(text: &str, spans: impl IntoIterator<Item = &'r Range<usize>>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for span in spans {
        out.push_str(&text[last..span.start]);
        last = span.end;
    }
    out.push_str(&text[last..]);
    out
}

fn parse_element<'a>(text: &'a str, start: usize, names: &[&str]) -> Option<Element<'a>> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut i = start + 1;

    let name_start = i;
    while i < len && is_name_byte(bytes[i]) {
        i += 1;
    }
    let name = &text[name_start..i];
    if name.is_empty() || !names.contains(&name) {
        return None;
    }

    let mut attributes = Vec::new();
    loop {
        let ws_start = i;
        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match *bytes.get(i)? {
            b'/' => {
                return (bytes.get(i + 1) == Some(&b'>')).then(|| Element {
                    name,
                    attributes,
                    body: None,
                    span: start..i + 2,
                });
            }
            b'>' => {
                let body_start = i + 1;
                let close = format!("</{name}>");
                let body_end = body_start + text[body_start..].find(&close)?;
                return Some(Element {
                    name,
                    attributes,
                    body: Some(&text[body_start..body_end]),
                    span: start..body_end + close.len(),
                });
            }
            _ => {
                if i == ws_start {
                    return None;
                }
                let key_start = i;
                while i < len && is_name_byte(bytes[i]) {
                    i += 1;
                }
                if i == key_start {
                    return None;
                }
                let key = &text[key_start..i];
                while i < len && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                if bytes.get(i) != Some(&b'=') {
                    return None;
                }
                i += 1;
                while i < len && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                let quote = *bytes.get(i)?;
                if quote != b'"' && quote != b'\'' {
                    return None;
                }
                let value_start = i + 1;
                let value_end = value_start + text[value_start..].find(quote as char)?;
                attributes.push((key, decode_entities(&text[value_start..value_end])));
                i = value_end + 1;
            }
        }
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':'
}

pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
