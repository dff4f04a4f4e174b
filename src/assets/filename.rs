//! Filename sanitization
//!
//! Attachment names come straight from chat users and end up in CDN public
//! ids, upload form fields and on-disk names, so they are normalized to a
//! conservative character set before any of that happens.

/// Maximum length (in characters) of a sanitized filename.
pub const MAX_FILENAME_LEN: usize = 100;

/// Prefix used when nothing usable survives sanitization.
pub const FALLBACK_FILENAME_PREFIX: &str = "fallbackFile-";

/// Punctuation allowed through in addition to letters, digits and spaces.
const ALLOWED_PUNCTUATION: &[char] = &[
    '.', '_', '-', '(', ')', '[', ']', '\'', ',', '+', '=', '!', '@', '#', '$', '%', '&', '~', ';',
];

fn is_allowed(c: char) -> bool {
    if c.is_control() {
        return false;
    }
    c.is_alphanumeric() || c.is_whitespace() || ALLOWED_PUNCTUATION.contains(&c)
}

fn trim_trailing(s: &str) -> &str {
    s.trim_end_matches(|c: char| c == '.' || c == ' ')
}

/// Normalize an untrusted name into a filesystem- and URL-safe filename.
///
/// The result never contains path separators, control characters or any of
/// `< > : " / \ | ? *`, is at most [`MAX_FILENAME_LEN`] characters long, and
/// is stable under re-application. An input with nothing usable in it yields
/// `fallbackFile-<random id>`.
///
/// # Example
///
/// ```
/// use transcript_assets::assets::sanitize_filename;
///
/// assert_eq!(sanitize_filename("  my/cat:pic?.png  "), "mycatpic.png");
/// assert!(sanitize_filename("....").starts_with("fallbackFile-"));
/// ```
pub fn sanitize_filename(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_FILENAME_LEN));
    let mut pending_space = false;

    for c in input.trim().chars().filter(|c| is_allowed(*c)) {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }

    let trimmed = trim_trailing(&out);
    let truncated: String = trimmed.chars().take(MAX_FILENAME_LEN).collect();
    let result = trim_trailing(&truncated);

    if result.is_empty() {
        return fallback_filename();
    }
    result.to_string()
}

/// Generate a unique placeholder filename.
pub fn fallback_filename() -> String {
    format!(
        "{}{}",
        FALLBACK_FILENAME_PREFIX,
        uuid::Uuid::new_v4().simple()
    )
}

/// Best-effort filename for a URL: the last non-empty path segment,
/// percent-decoded. Not sanitized.
pub fn filename_from_url(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

    fn assert_clean(s: &str) {
        assert!(s.chars().count() <= MAX_FILENAME_LEN, "too long: {s}");
        assert!(!s.chars().any(|c| FORBIDDEN.contains(&c)), "forbidden char in {s}");
        assert!(!s.chars().any(char::is_control), "control char in {s}");
    }

    #[test]
    fn test_plain_name_unchanged() {
        assert_eq!(sanitize_filename("cat.png"), "cat.png");
        assert_eq!(sanitize_filename("Report (final) [v2].pdf"), "Report (final) [v2].pdf");
    }

    #[test]
    fn test_strips_separators_and_reserved() {
        let out = sanitize_filename("../../etc/passwd");
        assert_eq!(out, "....etcpasswd");
        assert_clean(&out);

        let out = sanitize_filename("a<b>c:d\"e|f?g*h\\i.txt");
        assert_eq!(out, "abcdefghi.txt");
    }

    #[test]
    fn test_strips_control_characters() {
        let out = sanitize_filename("evil\u{0}name\u{7}\r\n.png");
        assert_eq!(out, "evilname.png");
        assert_clean(&out);
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(sanitize_filename("a   b \u{a0}\u{2003} c"), "a b c");
        // Tabs and newlines are control characters and are dropped outright.
        assert_eq!(sanitize_filename("a\tb\nc"), "abc");
    }

    #[test]
    fn test_strips_trailing_dots_and_spaces() {
        assert_eq!(sanitize_filename("name. . ."), "name");
        assert_eq!(sanitize_filename("archive.tar."), "archive.tar");
    }

    #[test]
    fn test_truncates_to_limit() {
        let long = "x".repeat(250);
        let out = sanitize_filename(&long);
        assert_eq!(out.chars().count(), MAX_FILENAME_LEN);
    }

    #[test]
    fn test_truncation_does_not_leave_trailing_dot() {
        let input = format!("{}.{}", "a".repeat(99), "bbbb");
        let out = sanitize_filename(&input);
        assert_eq!(out, "a".repeat(99));
    }

    #[test]
    fn test_keeps_unicode_letters() {
        assert_eq!(sanitize_filename("фото кота.jpg"), "фото кота.jpg");
    }

    #[test]
    fn test_empty_inputs_fall_back() {
        for input in ["", "....", "   ", "///", "\u{1}\u{2}"] {
            let out = sanitize_filename(input);
            let id = out
                .strip_prefix(FALLBACK_FILENAME_PREFIX)
                .unwrap_or_else(|| panic!("no fallback prefix for {input:?}: {out}"));
            assert_eq!(id.len(), 32);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_fallback_ids_are_unique() {
        assert_ne!(sanitize_filename(""), sanitize_filename(""));
    }

    #[test]
    fn test_idempotent() {
        let long = "z".repeat(300);
        let inputs = [
            "  hello   world  .png ",
            "a/b\\c",
            "x. . y. .",
            "....",
            long.as_str(),
            "tab\there",
            "emoji 😀 name.gif",
        ];
        for input in inputs {
            let once = sanitize_filename(input);
            let twice = sanitize_filename(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
            assert_clean(&once);
        }
    }

    #[test]
    fn test_filename_from_url() {
        let url = url::Url::parse("https://cdn.example/attachments/1/2/my%20cat.png?ex=1").unwrap();
        assert_eq!(filename_from_url(&url), "my cat.png");

        let url = url::Url::parse("https://cdn.example/").unwrap();
        assert_eq!(filename_from_url(&url), "");
    }
}
