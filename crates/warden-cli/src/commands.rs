// ABOUTME: Parsing of lines typed at the warden prompt.
// ABOUTME: Slash commands control the session; anything else is submitted as text.

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Free text to submit (or to answer the pending question with)
    Text(String),
    /// Skip the pending question: /skip
    Skip,
    /// Stop the current generation: /stop
    Stop,
    /// Start a new session: /new
    New,
    /// Show session status: /status
    Status,
    /// Show help: /help
    Help,
    /// Leave: /quit or /exit
    Quit,
    /// Blank line
    Empty,
    /// Unknown slash command
    Unknown(String),
}

impl Line {
    pub fn parse(input: &str) -> Line {
        let text = input.trim();
        if text.is_empty() {
            return Line::Empty;
        }

        let Some(command) = text.strip_prefix('/') else {
            return Line::Text(text.to_string());
        };

        // "//" escapes a literal leading slash
        if command.starts_with('/') {
            return Line::Text(command.to_string());
        }

        match command.split_whitespace().next().unwrap_or_default() {
            "skip" => Line::Skip,
            "stop" => Line::Stop,
            "new" => Line::New,
            "status" => Line::Status,
            "help" | "?" => Line::Help,
            "quit" | "exit" => Line::Quit,
            other => Line::Unknown(other.to_string()),
        }
    }
}

pub const HELP: &str = "\
Type a message and press enter to send it. When the assistant asks a
question, your next message answers it.

  /skip     skip the pending question
  /stop     stop the current response
  /new      start a new session
  /status   show session status
  /quit     leave
  //text    send text that starts with a slash";
