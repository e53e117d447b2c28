// ABOUTME: Incremental terminal rendering of session snapshots.
// ABOUTME: Prints only what changed since the previous snapshot, so streamed text appears as it grows.

use std::collections::HashMap;
use std::fmt::Write;

use colored::Colorize;
use warden_stream::{ConnectionStatus, Message, NoticeLevel, Notice, SessionSnapshot};

#[derive(Debug, Clone, Copy, Default)]
struct Printed {
    bytes: usize,
    done: bool,
}

/// Remembers what has been printed for one session.
#[derive(Debug, Default)]
pub struct Renderer {
    session_id: Option<String>,
    printed: HashMap<String, Printed>,
    /// Id of the entry whose text is mid-line on the terminal
    open_line: Option<String>,
    connection: Option<ConnectionStatus>,
    status_line: Option<String>,
    notice: Option<Notice>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to write for the transition to `snapshot`.
    pub fn update(&mut self, snapshot: &SessionSnapshot) -> String {
        let mut out = String::new();

        if self.session_id.as_deref() != Some(snapshot.session_id.as_str()) {
            if self.session_id.is_some() {
                self.close_line(&mut out);
                let _ = writeln!(
                    out,
                    "{}",
                    format!("--- new session {} ---", snapshot.session_id).dimmed()
                );
            }
            self.session_id = Some(snapshot.session_id.clone());
            self.printed.clear();
            self.status_line = None;
            self.notice = None;
        }

        if self.connection != Some(snapshot.connection) {
            if self.connection.is_some() {
                self.close_line(&mut out);
                let _ = writeln!(out, "{}", connection_label(snapshot.connection));
            }
            self.connection = Some(snapshot.connection);
        }

        if snapshot.notice != self.notice {
            if let Some(notice) = &snapshot.notice {
                self.close_line(&mut out);
                let _ = writeln!(out, "{}", notice_label(notice));
            }
            self.notice = snapshot.notice.clone();
        }

        if snapshot.status_line != self.status_line {
            if let Some(status) = &snapshot.status_line {
                self.close_line(&mut out);
                let _ = writeln!(
                    out,
                    "{} {}",
                    format!("[{:>3.0}%]", snapshot.progress.value).dimmed(),
                    status.dimmed()
                );
            }
            self.status_line = snapshot.status_line.clone();
        }

        for message in snapshot.messages.iter().filter(|m| !m.is_user && !m.is_loading) {
            self.render_message(message, &mut out);
        }
        out
    }

    fn render_message(&mut self, message: &Message, out: &mut String) {
        let printed = self.printed.get(&message.id).copied();
        if printed.is_some_and(|p| p.done) {
            return;
        }

        let from = match printed {
            Some(p) => p.bytes,
            None => {
                self.close_line(out);
                out.push_str(&prefix(message));
                0
            }
        };
        if let Some(tail) = message.response.get(from..) {
            out.push_str(tail);
        }

        let done = message.is_streaming_completed && !message.is_streaming;
        if done {
            out.push('\n');
            if self.open_line.as_deref() == Some(message.id.as_str()) {
                self.open_line = None;
            }
        } else {
            self.open_line = Some(message.id.clone());
        }
        self.printed.insert(
            message.id.clone(),
            Printed {
                bytes: message.response.len(),
                done,
            },
        );
    }

    /// End a partially printed streaming line before printing something else.
    fn close_line(&mut self, out: &mut String) {
        if self.open_line.take().is_some() {
            out.push('\n');
        }
    }
}

fn prefix(message: &Message) -> String {
    if message.is_error {
        format!("{} ", "error>".red().bold())
    } else if message.is_question {
        format!("{} ", "question>".yellow().bold())
    } else if message.is_document {
        format!("{} ", "document>".cyan().bold())
    } else {
        format!("{} ", "assistant>".green().bold())
    }
}

fn connection_label(status: ConnectionStatus) -> String {
    let label = match status {
        ConnectionStatus::Disconnected => "disconnected".dimmed(),
        ConnectionStatus::Connecting => "connecting...".dimmed(),
        ConnectionStatus::Connected => "connected".green(),
        ConnectionStatus::Reconnecting => "reconnecting...".yellow(),
        ConnectionStatus::Error => "connection failed".red(),
    };
    format!("[{}]", label)
}

fn notice_label(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Info => format!("{} {}", "i".blue().bold(), notice.text),
        NoticeLevel::Warning => format!("{} {}", "!".yellow().bold(), notice.text),
        NoticeLevel::Error => format!("{} {}", "x".red().bold(), notice.text.red()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_stream::SessionState;

    fn snapshot(session_id: &str, messages: Vec<Message>) -> SessionSnapshot {
        let mut snapshot = SessionState::new(session_id, 256).snapshot();
        snapshot.messages = messages;
        snapshot
    }

    fn streaming(id: &str, text: &str) -> Message {
        let mut msg = Message::placeholder(id.to_string());
        msg.begin_streaming();
        msg.push_visible(text);
        msg
    }

    #[test]
    fn test_streamed_text_printed_incrementally() {
        colored::control::set_override(false);
        let mut renderer = Renderer::new();

        let out = renderer.update(&snapshot("s-1", vec![streaming("m1", "The ")]));
        assert_eq!(out, "assistant> The ");

        let out = renderer.update(&snapshot("s-1", vec![streaming("m1", "The quick ")]));
        assert_eq!(out, "quick ");

        let mut done = streaming("m1", "The quick fox");
        done.finalize();
        let out = renderer.update(&snapshot("s-1", vec![done.clone()]));
        assert_eq!(out, "fox\n");

        assert_eq!(renderer.update(&snapshot("s-1", vec![done])), "");
    }

    #[test]
    fn test_user_and_loading_entries_are_skipped() {
        colored::control::set_override(false);
        let mut renderer = Renderer::new();
        let out = renderer.update(&snapshot(
            "s-1",
            vec![
                Message::user("m1".into(), "hello".into(), "q-1".into()),
                Message::placeholder("m2".into()),
            ],
        ));
        assert_eq!(out, "");
    }

    #[test]
    fn test_question_and_error_prefixes() {
        colored::control::set_override(false);
        let mut renderer = Renderer::new();
        let out = renderer.update(&snapshot(
            "s-1",
            vec![
                Message::question("m1".into(), "Which region?".into()),
                Message::error("m2".into(), "No response".into()),
            ],
        ));
        assert_eq!(out, "question> Which region?\nerror> No response\n");
    }

    #[test]
    fn test_new_session_resets_printed_state() {
        colored::control::set_override(false);
        let mut renderer = Renderer::new();
        renderer.update(&snapshot(
            "s-1",
            vec![Message::assistant("msg-1".into(), "old".into())],
        ));
        let out = renderer.update(&snapshot(
            "s-2",
            vec![Message::assistant("msg-1".into(), "new".into())],
        ));
        assert_eq!(out, "--- new session s-2 ---\nassistant> new\n");
    }

    #[test]
    fn test_notice_closes_open_line() {
        colored::control::set_override(false);
        let mut renderer = Renderer::new();
        renderer.update(&snapshot("s-1", vec![streaming("m1", "half")]));

        let mut next = snapshot("s-1", vec![streaming("m1", "half")]);
        next.notice = Some(Notice::warning("Connection lost."));
        assert_eq!(renderer.update(&next), "\n! Connection lost.\n");
    }
}
