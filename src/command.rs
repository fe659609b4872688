//! Prompt command parser
//!
//! Commands start with `:` (or are a lone `?`); every other non-blank line
//! is a message for the room.

/// A parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `:q` - leave the room and exit
    Quit,
    /// `:help` or `?`
    Help,
    /// `:clear` (or `:c`) - kick everyone out
    Clear,
    /// `:l` - list members
    List,
    /// `:hide` - send anonymously
    Hide,
    /// `:nohide` - sign messages again
    NoHide,
    /// Anything else that is not blank; the original line, newline included
    Send(String),
    /// Blank line
    Empty,
}

/// Parse one line as read from the prompt
pub fn parse(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }

    match trimmed {
        ":q" => Command::Quit,
        ":help" | "?" => Command::Help,
        ":clear" | ":c" => Command::Clear,
        ":l" => Command::List,
        ":hide" => Command::Hide,
        ":nohide" => Command::NoHide,
        _ => {
            let mut text = line.trim_end_matches(['\r', '\n']).to_string();
            text.push('\n');
            Command::Send(text)
        }
    }
}

/// Help text shown for `:help` and `?`
pub const HELP: &str = concat!(
    "    :l          List users\n",
    "    :clear      Clear all users\n",
    "    :q          Quit\n",
    "    :help, ?    Help\n",
    "    :hide       Send anonymously\n",
    "    :nohide     Sign messages again\n",
);
