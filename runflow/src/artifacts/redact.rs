use regex::Regex;
use std::sync::LazyLock;

static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").ok());

/// Replaces email addresses with a placeholder.
#[must_use]
pub fn redact(text: &str) -> String {
    match EMAIL_RE.as_ref() {
        Some(re) => re.replace_all(text, "[redacted@email]").into_owned(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_all_addresses() {
        assert_eq!(
            redact("a@b.co and x.y+z@mail.example.com"),
            "[redacted@email] and [redacted@email]"
        );
    }

    #[test]
    fn test_leaves_plain_text() {
        assert_eq!(redact("no contact here"), "no contact here");
    }
}
