//! Turns lines typed by the user into session commands.

use std::path::PathBuf;

/// Something the user asked the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SendText(String),
    SendImage(PathBuf),
    Rename(String),
    ToggleTheme,
    Help,
    Quit,
    /// A `/word` that is not a known command.
    Unknown(String),
}

pub const HELP_TEXT: &str = "commands: /name NEW  /theme  /image PATH  /help  /quit  (start a message with // to send a literal /)";

/// Parse one input line. Blank lines produce nothing.
pub fn parse_line(line: &str) -> Option<Command> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(literal) = trimmed.strip_prefix("//") {
        return Some(Command::SendText(format!("/{literal}")));
    }
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Some(Command::SendText(trimmed.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let cmd = match name.to_lowercase().as_str() {
        "name" | "nick" => Command::Rename(arg.to_string()),
        "theme" => Command::ToggleTheme,
        "image" | "img" => Command::SendImage(PathBuf::from(arg)),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(name.to_string()),
    };
    Some(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("hello", Command::SendText("hello".into()))]
    #[case("  padded  ", Command::SendText("padded".into()))]
    #[case("/name bob", Command::Rename("bob".into()))]
    #[case("/NAME   Bob Smith ", Command::Rename("Bob Smith".into()))]
    #[case("/nick bob", Command::Rename("bob".into()))]
    #[case("/name", Command::Rename(String::new()))]
    #[case("/theme", Command::ToggleTheme)]
    #[case("/image ./cat.png", Command::SendImage(PathBuf::from("./cat.png")))]
    #[case("/help", Command::Help)]
    #[case("/quit", Command::Quit)]
    #[case("/exit", Command::Quit)]
    #[case("/dance now", Command::Unknown("dance".into()))]
    #[case("//shrug", Command::SendText("/shrug".into()))]
    fn parses(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(parse_line(line), Some(expected));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("\t\n")]
    fn blank_lines_are_ignored(#[case] line: &str) {
        assert_eq!(parse_line(line), None);
    }
}
