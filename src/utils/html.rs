//! HTML helpers for Telegram's `ParseMode::Html`.

use teloxide::types::UserId;

/// Escape characters that Telegram's HTML parser treats as markup.
///
/// Quotes are escaped as well so the result is safe inside attribute values.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Build an inline mention link for a user.
///
/// The display name is escaped, the id goes into a `tg://user` link.
pub fn user_mention(user_id: UserId, display_name: &str) -> String {
    format!(
        "<a href=\"tg://user?id={}\">{}</a>",
        user_id,
        html_escape(display_name)
    )
}
