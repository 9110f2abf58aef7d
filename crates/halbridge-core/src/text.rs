//! Text normalization for chat lines and subprocess replies.

use std::sync::LazyLock;

use regex::Regex;

/// mIRC bold, reverse, reset, underline and italic toggles, plus colour
/// codes with an optional `fg[,bg]` pair of one or two digits each.
static FORMATTING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x02\x16\x0f\x1f\x12]|\x03(?:[0-9]{1,2}(?:,[0-9]{1,2})?)?")
        .expect("static regex is valid")
});

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bhttps?://\S").expect("static regex is valid"));

/// Strip mIRC formatting control sequences, leaving plain text.
///
/// Idempotent: every match starts with a control byte and the output
/// contains none.
pub fn strip_formatting(text: &str) -> String {
    FORMATTING_RE.replace_all(text, "").into_owned()
}

/// True if `text` contains an `http` or `https` link.
pub fn contains_url(text: &str) -> bool {
    URL_RE.is_match(text)
}
