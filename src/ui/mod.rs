//! Plain-text rendering of timeline rows and thread listings for the terminal tail.

use crate::domain::{ConnectionStatus, Message, ThreadSummary, ViewKey, ViewMode};
use time::OffsetDateTime;
use time::macros::format_description;
use unicode_width::UnicodeWidthStr;

pub const DEFAULT_WIDTH: usize = 120;

pub fn format_clock(timestamp_ms: Option<i64>) -> String {
    let Some(ms) = timestamp_ms else {
        return "--:--:--".to_string();
    };
    let nanos = i128::from(ms) * 1_000_000;
    let Ok(at) = OffsetDateTime::from_unix_timestamp_nanos(nanos) else {
        return "--:--:--".to_string();
    };
    at.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "--:--:--".to_string())
}

/// One terminal line for a row. `show_session` is set for the cross-session view.
pub fn format_row(message: &Message, mode: ViewMode, width: usize, show_session: bool) -> String {
    let summary = message.summary();
    let line = match mode {
        ViewMode::Timeline => {
            let clock = format_clock(message.timestamp_ms);
            let kind = message.kind.label();
            if show_session {
                format!("{clock} {kind:<9} [{}] {summary}", message.session_key)
            } else {
                format!("{clock} {kind:<9} {summary}")
            }
        }
        ViewMode::Compact => {
            if show_session {
                format!("{}/{}: {summary}", message.session_key, message.kind.label())
            } else {
                format!("{}: {summary}", message.kind.label())
            }
        }
    };
    truncate_end(&line, width)
}

pub fn format_status(status: ConnectionStatus, view: Option<&ViewKey>, unread: usize) -> String {
    let view = view.map(ViewKey::label).unwrap_or("-");
    format!("-- {} | view {view} | unread {unread} --", status.label())
}

/// `key<TAB>label<TAB>count<TAB>unread<TAB>last_seen`; closed threads are marked.
pub fn format_thread_line(thread: &ThreadSummary, unread: usize) -> String {
    let last = thread
        .last_seen
        .map(|point| format_clock(point.timestamp_ms))
        .unwrap_or_else(|| "-".to_string());
    let closed = if thread.closed { "\tclosed" } else { "" };
    format!(
        "{}\t{}\t{}\t{unread}\t{last}{closed}",
        thread.key,
        thread.display_label(),
        thread.count
    )
}

pub fn truncate_end(text: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(text) <= max_width {
        return text.to_string();
    }
    let ellipsis = "…";
    let available = max_width.saturating_sub(UnicodeWidthStr::width(ellipsis));
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let mut buf = [0u8; 4];
        let width = UnicodeWidthStr::width(&*ch.encode_utf8(&mut buf));
        if used + width > available {
            break;
        }
        used += width;
        out.push(ch);
    }
    out.push_str(ellipsis);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageKind, SessionKey, ThreadIndex};

    #[test]
    fn clock_formats_utc_and_handles_missing() {
        assert_eq!(format_clock(Some(1_771_451_157_803)), "21:45:57");
        assert_eq!(format_clock(None), "--:--:--");
    }

    #[test]
    fn rows_follow_view_mode() {
        let message = Message::new("m1", SessionKey::from("s1"), MessageKind::AssistantMessage)
            .with_timestamp_ms(1_771_451_157_803)
            .with_text("\n  done with the build\nmore");
        assert_eq!(
            format_row(&message, ViewMode::Timeline, 80, false),
            "21:45:57 assistant done with the build"
        );
        assert_eq!(
            format_row(&message, ViewMode::Compact, 80, true),
            "s1/assistant: done with the build"
        );
    }

    #[test]
    fn truncation_respects_display_width() {
        assert_eq!(truncate_end("hello", 10), "hello");
        assert_eq!(truncate_end("hello world", 6), "hello…");
        assert_eq!(truncate_end("日本語テキスト", 7), "日本語…");
        assert_eq!(truncate_end("abc", 0), "");
    }

    #[test]
    fn thread_lines_are_tab_separated() {
        let mut index = ThreadIndex::default();
        let key = SessionKey::from("s1");
        index.record(&Message::new("a", key.clone(), MessageKind::UserMessage));
        index.set_label(&key, Some("Refactor".to_string()));
        index.close(&key);
        let thread = index.get(&key).expect("thread");
        assert_eq!(format_thread_line(thread, 2), "s1\tRefactor\t1\t2\t-\tclosed");
    }
}
