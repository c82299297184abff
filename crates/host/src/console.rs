use std::io::{self, BufRead};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `None` prints the current value.
    Listen(Option<bool>),
    Port(Option<i64>),
    MaxPlayers(Option<i64>),
    Slist,
    NetStats(Option<String>),
    Connect(Option<String>),
    /// Player query (`test`).
    Test(String),
    /// Rule query (`test2`).
    Test2(String),
    Ban(BanArgs),
    Say(String),
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanArgs {
    Show,
    Off,
    Set { addr: String, mask: Option<String> },
    Usage,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Unknown command \"{0}\"")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Leading decimal integer of `text`, 0 when there is none.
pub fn atoi(text: &str) -> i64 {
    let text = text.trim_start();
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, text.strip_prefix('+').unwrap_or(text)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    sign * digits[..end].parse::<i64>().unwrap_or(0)
}

fn single<'a>(args: &'a [&'a str]) -> Option<&'a str> {
    match args {
        [arg] => Some(arg),
        _ => None,
    }
}

/// `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> Result<Option<Command>, ParseError> {
    let mut args = line.split_whitespace();
    let Some(name) = args.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = args.collect();

    let command = match name.to_ascii_lowercase().as_str() {
        "listen" => Command::Listen(single(&args).map(|a| atoi(a) != 0)),
        "port" => Command::Port(single(&args).map(atoi)),
        "maxplayers" => Command::MaxPlayers(single(&args).map(atoi)),
        "slist" => Command::Slist,
        "net_stats" => Command::NetStats(args.first().map(|a| a.to_string())),
        "connect" => Command::Connect(args.first().map(|a| a.to_string())),
        "test" => Command::Test(
            args.first()
                .ok_or(ParseError::Usage("test <host>"))?
                .to_string(),
        ),
        "test2" => Command::Test2(
            args.first()
                .ok_or(ParseError::Usage("test2 <host>"))?
                .to_string(),
        ),
        "ban" => Command::Ban(match args.as_slice() {
            [] => BanArgs::Show,
            [addr] if addr.eq_ignore_ascii_case("off") => BanArgs::Off,
            [addr] => BanArgs::Set {
                addr: addr.to_string(),
                mask: None,
            },
            [addr, mask] => BanArgs::Set {
                addr: addr.to_string(),
                mask: Some(mask.to_string()),
            },
            _ => BanArgs::Usage,
        }),
        "say" => {
            if args.is_empty() {
                return Err(ParseError::Usage("say <text>"));
            }
            Command::Say(args.join(" "))
        }
        "status" => Command::Status,
        "quit" | "exit" => Command::Quit,
        _ => return Err(ParseError::Unknown(name.to_string())),
    };
    Ok(Some(command))
}

/// Reads console lines on a background thread. The thread ends at end of
/// input or once the receiving side is gone.
pub fn spawn_stdin(commands: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if commands.send(line).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atoi_matches_console_semantics() {
        assert_eq!(atoi("26001"), 26001);
        assert_eq!(atoi("  12abc"), 12);
        assert_eq!(atoi("-3"), -3);
        assert_eq!(atoi("abc"), 0);
        assert_eq!(atoi(""), 0);
    }

    #[test]
    fn test_value_commands_without_argument_query() {
        assert_eq!(parse_command("listen").unwrap(), Some(Command::Listen(None)));
        assert_eq!(parse_command("port").unwrap(), Some(Command::Port(None)));
        assert_eq!(
            parse_command("maxplayers 4 extra").unwrap(),
            Some(Command::MaxPlayers(None))
        );
    }

    #[test]
    fn test_value_commands_with_argument() {
        assert_eq!(
            parse_command("LISTEN 1").unwrap(),
            Some(Command::Listen(Some(true)))
        );
        assert_eq!(
            parse_command("listen no").unwrap(),
            Some(Command::Listen(Some(false)))
        );
        assert_eq!(
            parse_command("port 70000").unwrap(),
            Some(Command::Port(Some(70000)))
        );
        assert_eq!(
            parse_command("maxplayers 8").unwrap(),
            Some(Command::MaxPlayers(Some(8)))
        );
    }

    #[test]
    fn test_ban_arguments() {
        assert_eq!(
            parse_command("ban").unwrap(),
            Some(Command::Ban(BanArgs::Show))
        );
        assert_eq!(
            parse_command("ban OFF").unwrap(),
            Some(Command::Ban(BanArgs::Off))
        );
        assert_eq!(
            parse_command("ban 10.0.0.0 255.0.0.0").unwrap(),
            Some(Command::Ban(BanArgs::Set {
                addr: "10.0.0.0".to_string(),
                mask: Some("255.0.0.0".to_string()),
            }))
        );
        assert_eq!(
            parse_command("ban a b c").unwrap(),
            Some(Command::Ban(BanArgs::Usage))
        );
    }

    #[test]
    fn test_probe_and_chat_commands() {
        assert_eq!(
            parse_command("test arena").unwrap(),
            Some(Command::Test("arena".to_string()))
        );
        assert_eq!(
            parse_command("test2"),
            Err(ParseError::Usage("test2 <host>"))
        );
        assert_eq!(
            parse_command("say  hello   there").unwrap(),
            Some(Command::Say("hello there".to_string()))
        );
        assert_eq!(
            parse_command("connect").unwrap(),
            Some(Command::Connect(None))
        );
    }

    #[test]
    fn test_blank_and_unknown_lines() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(
            parse_command("fly"),
            Err(ParseError::Unknown("fly".to_string()))
        );
    }
}
