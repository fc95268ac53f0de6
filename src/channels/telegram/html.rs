//! Responder output sanitization for Telegram
//!
//! Telegram's HTML parse mode supports only a small tag set: `<br>` must
//! become a newline and paragraph tags must go away entirely or the send is
//! rejected.

use std::sync::LazyLock;

use regex::Regex;

static BR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));
static P_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</p>").expect("valid regex"));
static P_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<p>").expect("valid regex"));
static NBSP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)&nbsp;").expect("valid regex"));

/// Rewrite responder HTML into the subset Telegram accepts
#[must_use]
pub fn sanitize_responder_html(text: &str) -> String {
    let text = BR.replace_all(text, "\n");
    let text = P_CLOSE.replace_all(&text, "\n");
    let text = P_OPEN.replace_all(&text, "");
    let text = NBSP.replace_all(&text, " ");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::sanitize_responder_html;

    #[test]
    fn rewrites_breaks_and_paragraphs() {
        assert_eq!(
            sanitize_responder_html("<p>Добрый день!</p><p>Чем помочь?<br/>Пишите.</p>"),
            "Добрый день!\nЧем помочь?\nПишите."
        );
    }

    #[test]
    fn replaces_nbsp_and_keeps_supported_tags() {
        assert_eq!(
            sanitize_responder_html("Цена:&nbsp;<b>100</b><BR>за кВт"),
            "Цена: <b>100</b>\nза кВт"
        );
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(sanitize_responder_html("Здравствуйте!"), "Здравствуйте!");
    }
}
