use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

// A comment never spans a line terminator (`\n`, `\r`, U+2028, U+2029); one that
// does is left in place and only loses its angle brackets below.
static HTML_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--[^\n\r\x{2028}\x{2029}]*?-->").unwrap());
static ATTRIBUTE_FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[<>"']"#).unwrap());
static CONTROL_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\r\n\t]").unwrap());
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>?").unwrap());

/// sanitize_attribute
///
/// Prepares a value for an HTML attribute context: removes HTML comments, removes the
/// characters `<`, `>`, `"` and `'`, turns each carriage return, newline and tab into a
/// single space, then trims. Tag text itself is left in place.
pub fn sanitize_attribute(value: &str) -> String {
    let without_comments = HTML_COMMENT.replace_all(value, "");
    let without_forbidden = ATTRIBUTE_FORBIDDEN.replace_all(&without_comments, "");
    let flattened = CONTROL_WHITESPACE.replace_all(&without_forbidden, " ");
    flattened.trim().to_string()
}

/// sanitize_text
///
/// Prepares a value for an HTML text node: removes every tag-like substring
/// (an unterminated trailing `<...` included), then trims.
pub fn sanitize_text(value: &str) -> String {
    HTML_TAG.replace_all(value, "").trim().to_string()
}

/// Value-level form of [`sanitize_attribute`]; anything but a string passes through.
pub fn sanitize_attribute_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_attribute(s)),
        other => other.clone(),
    }
}

/// Value-level form of [`sanitize_text`]; anything but a string passes through.
pub fn sanitize_text_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_text(s)),
        other => other.clone(),
    }
}

/// Sanitizers
///
/// The fixed two-entry surface handed to view templates. Both entries take any JSON
/// value and return a value of the same kind.
#[derive(Clone, Copy)]
pub struct Sanitizers {
    pub attribute: fn(&Value) -> Value,
    pub text: fn(&Value) -> Value,
}

pub const SANITIZERS: Sanitizers = Sanitizers {
    attribute: sanitize_attribute_value,
    text: sanitize_text_value,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_multiline_comment_is_not_a_comment() {
        // Only single-line comments are stripped whole.
        assert_eq!(sanitize_attribute("a<!--x\ny-->b"), "a!--x y--b");
        assert_eq!(sanitize_attribute("a<!--x\ry-->b"), "a!--x y--b");
        assert_eq!(sanitize_attribute("a<!--x\u{2028}y-->b"), "a!--x\u{2028}y--b");
    }

    #[test]
    fn test_text_strips_unterminated_tag() {
        assert_eq!(sanitize_text("safe <script"), "safe");
    }
}
