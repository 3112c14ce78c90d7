//! Minimal RFC 822 / MIME decoding.
//!
//! Enough to read verification mail: unfolded headers, RFC 2047 encoded
//! words in the subject, and a walk over multipart bodies that decodes
//! base64 and quoted-printable parts. Anything richer is out of scope.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Headers and body of one message or MIME part
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ParsedMessage {
    /// Split raw bytes into unfolded headers and body
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let (head, body) = split_head_body(raw);
        let head = String::from_utf8_lossy(head);

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in head.lines() {
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = headers.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        Self {
            headers,
            body: body.to_vec(),
        }
    }

    /// First header value by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Decoded Subject header, empty when missing
    #[must_use]
    pub fn subject(&self) -> String {
        self.header("Subject")
            .map(decode_encoded_words)
            .unwrap_or_default()
    }

    /// Address part of the From header
    #[must_use]
    pub fn sender(&self) -> String {
        let from = self.header("From").unwrap_or_default();
        match (from.rfind('<'), from.rfind('>')) {
            (Some(start), Some(end)) if start < end => from[start + 1..end].trim().to_string(),
            _ => from.trim().to_string(),
        }
    }

    /// Date header
    #[must_use]
    pub fn date(&self) -> Option<DateTime<Utc>> {
        let raw = self.header("Date")?;
        // Some servers append a "(UTC)" comment
        let cleaned = raw.split(" (").next().unwrap_or(raw).trim();
        DateTime::parse_from_rfc2822(cleaned)
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }

    /// Body text: first `text/plain` part, else first `text/html` part
    #[must_use]
    pub fn body_text(&self) -> String {
        let mut plain = None;
        let mut html = None;
        self.collect_text(&mut plain, &mut html, 0);
        plain.or(html).unwrap_or_default()
    }

    fn content_type(&self) -> (String, Option<String>, Option<String>) {
        let raw = self.header("Content-Type").unwrap_or("text/plain");
        let mut parts = raw.split(';');
        let mime = parts.next().unwrap_or("text/plain").trim().to_ascii_lowercase();
        let mut boundary = None;
        let mut charset = None;
        for param in parts {
            if let Some((key, value)) = param.split_once('=') {
                let value = value.trim().trim_matches('"').to_string();
                match key.trim().to_ascii_lowercase().as_str() {
                    "boundary" => boundary = Some(value),
                    "charset" => charset = Some(value),
                    _ => {}
                }
            }
        }
        (mime, boundary, charset)
    }

    fn collect_text(&self, plain: &mut Option<String>, html: &mut Option<String>, depth: usize) {
        if depth > 8 || (plain.is_some() && html.is_some()) {
            return;
        }
        let (mime, boundary, charset) = self.content_type();

        if mime.starts_with("multipart/") {
            let Some(boundary) = boundary else { return };
            for part in split_multipart(&self.body, &boundary) {
                Self::parse(part).collect_text(plain, html, depth + 1);
            }
            return;
        }

        let encoding = self
            .header("Content-Transfer-Encoding")
            .unwrap_or("7bit")
            .trim()
            .to_ascii_lowercase();
        let bytes = match encoding.as_str() {
            "base64" => decode_base64_lenient(&self.body),
            "quoted-printable" => decode_quoted_printable(&self.body, false),
            _ => self.body.clone(),
        };
        let text = decode_charset(&bytes, charset.as_deref());

        if mime == "text/html" {
            html.get_or_insert(text);
        } else if mime.starts_with("text/") {
            plain.get_or_insert(text);
        }
    }
}

fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    for (sep, len) in [(&b"\r\n\r\n"[..], 4), (&b"\n\n"[..], 2)] {
        if let Some(pos) = raw.windows(len).position(|w| w == sep) {
            return (&raw[..pos], &raw[pos + len..]);
        }
    }
    (raw, &[])
}

fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut positions = Vec::new();
    let mut i = 0;
    while i + delimiter.len() <= body.len() {
        if &body[i..i + delimiter.len()] == delimiter && (i == 0 || body[i - 1] == b'\n') {
            positions.push(i);
            i += delimiter.len();
        } else {
            i += 1;
        }
    }

    let mut parts = Vec::new();
    for pair in positions.windows(2) {
        let start = pair[0] + delimiter.len();
        let chunk = &body[start..pair[1]];
        // Skip the line break after the delimiter
        let chunk = chunk
            .strip_prefix(b"\r\n")
            .or_else(|| chunk.strip_prefix(b"\n"))
            .unwrap_or(chunk);
        parts.push(chunk);
    }
    parts
}

fn decode_base64_lenient(body: &[u8]) -> Vec<u8> {
    let compact: Vec<u8> = body
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(&compact).unwrap_or_else(|_| body.to_vec())
}

/// Quoted-printable; `header` mode maps `_` to space (RFC 2047 "Q")
fn decode_quoted_printable(input: &[u8], header: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'=' => {
                // Soft line break
                if input.get(i + 1) == Some(&b'\r') && input.get(i + 2) == Some(&b'\n') {
                    i += 3;
                    continue;
                }
                if input.get(i + 1) == Some(&b'\n') {
                    i += 2;
                    continue;
                }
                let hex = input.get(i + 1..i + 3).and_then(|h| {
                    std::str::from_utf8(h)
                        .ok()
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                });
                if let Some(byte) = hex {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(b'=');
                    i += 1;
                }
            }
            b'_' if header => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

fn decode_charset(bytes: &[u8], charset: Option<&str>) -> String {
    match charset.map(str::to_ascii_lowercase).as_deref() {
        Some("iso-8859-1" | "latin1" | "latin-1" | "windows-1252" | "cp1252") => {
            bytes.iter().map(|&b| char::from(b)).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn encoded_word_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"=\?([^?\s]+)\?([bBqQ])\?([^?\s]*)\?=").ok())
        .as_ref()
}

/// Decode RFC 2047 encoded words. Whitespace between two adjacent encoded
/// words is dropped.
#[must_use]
pub fn decode_encoded_words(input: &str) -> String {
    let Some(re) = encoded_word_regex() else {
        return input.to_string();
    };
    let mut out = String::with_capacity(input.len());
    let mut last_end = 0;
    let mut previous_was_word = false;

    for caps in re.captures_iter(input) {
        let Some(whole) = caps.get(0) else { continue };
        let gap = &input[last_end..whole.start()];
        if !(previous_was_word && gap.trim().is_empty()) {
            out.push_str(gap);
        }

        let charset = caps.get(1).map_or("utf-8", |m| m.as_str());
        let text = caps.get(3).map_or("", |m| m.as_str());
        let bytes = match caps.get(2).map(|m| m.as_str()) {
            Some("B" | "b") => STANDARD.decode(text).unwrap_or_else(|_| text.as_bytes().to_vec()),
            _ => decode_quoted_printable(text.as_bytes(), true),
        };
        out.push_str(&decode_charset(&bytes, Some(charset)));

        last_end = whole.end();
        previous_was_word = true;
    }
    out.push_str(&input[last_end..]);
    out
}
