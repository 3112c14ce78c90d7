//! Markup-to-text extraction shared by code extraction and content checks.

use scraper::Html;

/// Text nodes of `markup`, each trimmed, empties dropped, joined with `sep`.
///
/// With `sep = ""` this matches the usual "get text, strip" normalisation,
/// so two renderings of the same content compare equal regardless of
/// whitespace and tags.
#[must_use]
pub fn markup_text(markup: &str, sep: &str) -> String {
    let document = Html::parse_document(markup);
    document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Whether the input looks like markup at all
#[must_use]
pub fn looks_like_markup(input: &str) -> bool {
    let trimmed = input.trim_start();
    trimmed.starts_with('<') || (input.contains("</") && input.contains('>'))
}

/// Readable text for pattern matching: markup stripped with a space between
/// text nodes, plain text passed through
#[must_use]
pub fn readable_text(input: &str) -> String {
    if looks_like_markup(input) {
        markup_text(input, " ")
    } else {
        input.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_joins_without_separator() {
        let html = "<html><body><h1> Report </h1>\n<p>High:  3</p></body></html>";
        assert_eq!(markup_text(html, ""), "ReportHigh:  3");
    }

    #[test]
    fn test_whitespace_and_tags_do_not_matter() {
        let a = "<div><span>Issue</span> <b>High</b></div>";
        let b = "<div>\n  <span>Issue</span>\n  <b>High</b>\n</div>";
        assert_eq!(markup_text(a, ""), markup_text(b, ""));
    }

    #[test]
    fn test_readable_text_keeps_token_boundaries() {
        let html = "<p>Your code is<b>482913</b></p>";
        assert_eq!(readable_text(html), "Your code is 482913");
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(readable_text("Your code: 1234"), "Your code: 1234");
        assert!(!looks_like_markup("a < b and c > d"));
    }
}
