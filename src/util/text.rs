use std::borrow::Cow;

/// Maximum entity-decoding passes applied to a single field
const MAX_UNESCAPE_PASSES: usize = 2;

/// Decodes HTML entities in a feed text field.
///
/// Feed producers routinely double-encode (`&amp;amp;`), so decoding runs
/// until the text stops changing, bounded by two passes. The result is
/// trimmed and stripped of control characters.
///
/// # Examples
///
/// ```
/// use gator::util::unescape_html;
///
/// assert_eq!(unescape_html("Cats &amp; Dogs"), "Cats & Dogs");
/// assert_eq!(unescape_html("Caf&eacute; &#8211; open"), "Café – open");
/// ```
pub fn unescape_html(s: &str) -> String {
    let mut text: Cow<'_, str> = Cow::Borrowed(s);
    for _ in 0..MAX_UNESCAPE_PASSES {
        let decoded = html_escape::decode_html_entities(&text).into_owned();
        if decoded == text {
            break;
        }
        text = Cow::Owned(decoded);
    }
    strip_control_chars(text.trim()).into_owned()
}

/// Removes control characters except newline and tab.
///
/// Returns `Cow::Borrowed` when nothing needs removing.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if s.chars().any(is_stripped) {
        Cow::Owned(s.chars().filter(|c| !is_stripped(*c)).collect())
    } else {
        Cow::Borrowed(s)
    }
}

fn is_stripped(c: char) -> bool {
    c.is_control() && c != '\n' && c != '\t'
}

/// Truncates to at most `max_chars` characters, appending "..." when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some(_) if max_chars <= 3 => Cow::Owned(s.chars().take(max_chars).collect()),
        Some(_) => {
            let kept: String = s.chars().take(max_chars - 3).collect();
            Cow::Owned(format!("{}...", kept.trim_end()))
        }
    }
}
