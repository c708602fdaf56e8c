use chrono::{DateTime, Datelike, Timelike, Utc};
use std::borrow::Cow;

/// Reduces an HTML fragment to plain text.
///
/// Tags are dropped, then entity references in the remaining text are
/// decoded. The order matters: entity-encoded markup (`&lt;b&gt;`) is
/// literal text, not a tag, so it must survive the tag pass and only then
/// be decoded.
///
/// This mirrors what a DOM round-trip (`innerHTML` in, `textContent` out)
/// produces, which is the shape feed descriptions are displayed in.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }

    match html_escape::decode_html_entities(&text) {
        Cow::Borrowed(_) => text,
        Cow::Owned(decoded) => decoded,
    }
}

/// Formats a publication date compactly relative to `now`.
///
/// - more than a year apart: `MM/YYYY`
/// - today or later this month: `HH:MM`
/// - otherwise: `DD/MM`
pub fn format_date(date: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if now.year() - date.year() > 1 {
        return format!("{:02}/{}", date.month(), date.year());
    }

    if now.day() <= date.day() && now.month() == date.month() {
        format!("{:02}:{:02}", date.hour(), date.minute())
    } else {
        format!("{:02}/{:02}", date.day(), date.month())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_strip_html_removes_tags() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
    }

    #[test]
    fn test_strip_html_decodes_entities() {
        assert_eq!(strip_html("fish &amp; chips"), "fish & chips");
        assert_eq!(strip_html("a &lt; b"), "a < b");
    }

    #[test]
    fn test_strip_html_encoded_markup_stays_literal() {
        // &lt;b&gt; is text, not a tag — it must not be stripped
        assert_eq!(strip_html("&lt;b&gt;bold&lt;/b&gt;"), "<b>bold</b>");
    }

    #[test]
    fn test_strip_html_plain_text_unchanged() {
        assert_eq!(strip_html("just words"), "just words");
    }

    #[test]
    fn test_strip_html_img_and_breaks() {
        assert_eq!(
            strip_html("<img src=\"x.png\" />line<br/>break"),
            "linebreak"
        );
    }

    #[test]
    fn test_format_date_old_year() {
        let date = Utc.with_ymd_and_hms(2021, 3, 14, 9, 26, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(format_date(date, now), "03/2021");
    }

    #[test]
    fn test_format_date_same_day_shows_time() {
        let date = Utc.with_ymd_and_hms(2024, 6, 1, 9, 5, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(format_date(date, now), "09:05");
    }

    #[test]
    fn test_format_date_earlier_this_year() {
        let date = Utc.with_ymd_and_hms(2024, 2, 9, 9, 5, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(format_date(date, now), "09/02");
    }
}
