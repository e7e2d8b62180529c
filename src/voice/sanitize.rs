//! Text cleanup before speech synthesis
//!
//! Chat replies arrive as Markdown with the occasional emoji or HTML fragment.
//! None of that should be read aloud, so [`sanitize`] reduces arbitrary text to
//! plain, whitespace-normalized prose.

use std::sync::LazyLock;

use regex::Regex;

static EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        "[",
        r"\x{1F000}-\x{1FAFF}", // pictographs, emoticons, transport, supplemental symbols
        r"\x{1F1E6}-\x{1F1FF}", // regional indicators (flag pairs)
        r"\x{2600}-\x{27BF}",   // misc symbols and dingbats
        r"\x{2300}-\x{23FF}",   // misc technical
        r"\x{2B00}-\x{2BFF}",   // arrows and stars
        r"\x{FE00}-\x{FE0F}",   // variation selectors
        r"\x{200D}",            // zero-width joiner
        r"\x{20E3}",            // combining keycap
        r"\x{E0020}-\x{E007F}", // tag sequences
        r"\x{3030}\x{303D}\x{3297}\x{3299}",
        "]",
    ))
    .expect("valid regex")
});

static FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));

static HORIZONTAL_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:(?:-[ \t]*){3,}|(?:\*[ \t]*){3,}|(?:_[ \t]*){3,})$")
        .expect("valid regex")
});

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid regex"));

static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]+").expect("valid regex"));

static BLOCKQUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*>[ \t]?").expect("valid regex"));

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:[-*+]|\d+[.)])[ \t]+").expect("valid regex"));

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*|__([^_]+)__").expect("valid regex"));

static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*").expect("valid regex"));

static UNDERSCORE_ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b_([^_\n]+)_\b").expect("valid regex"));

static STRIKETHROUGH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"~~([^~]+)~~").expect("valid regex"));

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]+>").expect("valid regex"));

static HTML_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:[a-zA-Z][a-zA-Z0-9]*|#[0-9]+|#[xX][0-9a-fA-F]+);").expect("valid regex")
});

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Reduce arbitrary chat text to speech-safe plain text.
///
/// Passes run in order, each on the previous output:
/// 1. emoji (pictographs, flags, variation selectors, joiners) removed
/// 2. Markdown stripped: fenced code blocks and images dropped entirely,
///    links keep their text, emphasis, inline code, headers, quotes,
///    list markers and horizontal rules unwrapped or removed
/// 3. HTML tags and entities removed
/// 4. whitespace collapsed and trimmed
///
/// Unwrapping can expose new markup (`` `**x**` ``), so the passes repeat
/// until the text stops changing. The result is therefore idempotent.
/// Emoji-only or markup-only input yields an empty string.
#[must_use]
pub fn sanitize(text: &str) -> String {
    // Every pass deletes characters or turns whitespace into spaces, so a
    // changed round either shortens the text or converges on spaces
    let mut current = clean_once(text);
    loop {
        let next = clean_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Sanitize optional input, treating `None` as empty
#[must_use]
pub fn sanitize_opt(text: Option<&str>) -> String {
    text.map(sanitize).unwrap_or_default()
}

fn clean_once(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = strip_emoji(text);
    let text = strip_markdown(&text);
    let text = strip_html(&text);
    normalize_whitespace(&text)
}

fn strip_emoji(text: &str) -> String {
    EMOJI.replace_all(text, "").into_owned()
}

fn strip_markdown(text: &str) -> String {
    let text = FENCED_CODE.replace_all(text, "");
    let text = HORIZONTAL_RULE.replace_all(&text, "");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = IMAGE.replace_all(&text, "");
    let text = LINK.replace_all(&text, "$1");
    let text = HEADER.replace_all(&text, "");
    let text = BLOCKQUOTE.replace_all(&text, "");
    let text = LIST_MARKER.replace_all(&text, "");
    let text = BOLD.replace_all(&text, "$1$2");
    let text = ITALIC.replace_all(&text, "$1");
    let text = UNDERSCORE_ITALIC.replace_all(&text, "$1");
    STRIKETHROUGH.replace_all(&text, "$1").into_owned()
}

fn strip_html(text: &str) -> String {
    let text = HTML_TAG.replace_all(text, "");
    HTML_ENTITY.replace_all(&text, "").into_owned()
}

fn normalize_whitespace(text: &str) -> String {
    let text = EXCESS_NEWLINES.replace_all(text, "\n\n");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}
