use crate::domain::{DEFAULT_VIEW_MAX, SessionKey, ViewKey};
use crate::infra::DEFAULT_SERVER_URL;
use thiserror::Error;

pub const SERVER_ENV: &str = "TAILBOARD_SERVER";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientConfig {
    pub server_url: String,
    pub initial_view: ViewKey,
    pub view_max: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            initial_view: ViewKey::All,
            view_max: DEFAULT_VIEW_MAX,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliInvocation {
    PrintHelp,
    PrintVersion,
    Tail(ClientConfig),
    Threads(ClientConfig),
}

#[derive(Debug, Error)]
pub enum CliParseError {
    #[error("unknown subcommand: {0}")]
    UnknownSubcommand(String),

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("missing value for flag: {0}")]
    MissingFlagValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidFlagValue { flag: String, value: String },

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, CliParseError> {
    parse_invocation_with_env(args, |name| std::env::var(name).ok())
}

/// Flags override the environment, which overrides built-in defaults.
pub fn parse_invocation_with_env(
    args: &[String],
    env: impl Fn(&str) -> Option<String>,
) -> Result<CliInvocation, CliParseError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(CliInvocation::PrintHelp);
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        return Ok(CliInvocation::PrintVersion);
    }

    let mut config = ClientConfig::default();
    if let Some(server) = env(SERVER_ENV).filter(|value| !value.trim().is_empty()) {
        config.server_url = server.trim().to_string();
    }

    let mut subcommand: Option<&str> = None;
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--server" | "-s" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliParseError::MissingFlagValue("--server".to_string()))?;
                config.server_url = parse_server_flag("--server", value)?;
            }
            "--session" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliParseError::MissingFlagValue("--session".to_string()))?;
                config.initial_view = ViewKey::parse(value);
            }
            "--view-max" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliParseError::MissingFlagValue("--view-max".to_string()))?;
                config.view_max = parse_positive_flag("--view-max", value)?;
            }
            "--" => break,
            _ if arg.starts_with('-') => {
                return Err(CliParseError::UnknownFlag(arg.to_string()));
            }
            _ if subcommand.is_none() => {
                subcommand = Some(arg.as_str());
            }
            _ => return Err(CliParseError::UnexpectedArgument(arg.to_string())),
        }
    }

    match subcommand {
        None => Ok(CliInvocation::Tail(config)),
        Some("threads") => Ok(CliInvocation::Threads(config)),
        Some(other) => Err(CliParseError::UnknownSubcommand(other.to_string())),
    }
}

fn parse_server_flag(flag: &str, value: &str) -> Result<String, CliParseError> {
    let trimmed = value.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Ok(trimmed.to_string());
    }
    Err(CliParseError::InvalidFlagValue {
        flag: flag.to_string(),
        value: value.to_string(),
    })
}

fn parse_positive_flag(flag: &str, value: &str) -> Result<usize, CliParseError> {
    match value.parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(CliParseError::InvalidFlagValue {
            flag: flag.to_string(),
            value: value.to_string(),
        }),
    }
}

pub fn help_text() -> String {
    format!(
        "{name} - follow agent session timelines from a timeline server\n\nUSAGE:\n  {name} [--server URL] [--session KEY|all] [--view-max N]   Live tail of one view\n  {name} threads [--server URL]                              Print known threads\n  {name} --help | --version\n\nCOMMANDS (type while tailing):\n  :open KEY        Switch to a session view\n  :all             Switch to the cross-session view\n  :next            Jump to the oldest unread item of the active session\n  :read            Mark the active session read\n  :threads         List threads with unread counts\n  :close KEY       Hide a thread until new dialog arrives\n  :label KEY TEXT  Set a thread label (empty TEXT clears)\n  :pin             Toggle following the selected session on the server\n  :mode            Toggle timeline/compact rows\n  :quit            Exit\n\nOUTPUT:\n  threads: key<TAB>label<TAB>count<TAB>unread<TAB>last_seen\n\nENV:\n  {server_env}      Server base URL (default: {default_server})\n  TAILBOARD_STATE_DIR   Preferences dir (default: ~/.tailboard)\n  TAILBOARD_LOG         Log filter, falls back to RUST_LOG (default: info)\n",
        name = env!("CARGO_PKG_NAME"),
        server_env = SERVER_ENV,
        default_server = DEFAULT_SERVER_URL,
    )
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TailCommand {
    Open(ViewKey),
    Next,
    Read,
    Threads,
    Close(SessionKey),
    Label { session: SessionKey, text: String },
    Pin,
    Mode,
    Quit,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum TailCommandError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("{command} needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
}

/// Parses one stdin line. Blank lines are `Ok(None)`.
pub fn parse_tail_command(line: &str) -> Result<Option<TailCommand>, TailCommandError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let (head, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (trimmed, ""),
    };

    let command = match head {
        ":open" | ":o" => {
            if rest.is_empty() {
                return Err(TailCommandError::MissingArgument {
                    command: ":open",
                    argument: "a session key",
                });
            }
            TailCommand::Open(ViewKey::parse(rest))
        }
        ":all" => TailCommand::Open(ViewKey::All),
        ":next" | ":n" => TailCommand::Next,
        ":read" => TailCommand::Read,
        ":threads" | ":t" => TailCommand::Threads,
        ":close" => {
            if rest.is_empty() {
                return Err(TailCommandError::MissingArgument {
                    command: ":close",
                    argument: "a session key",
                });
            }
            TailCommand::Close(SessionKey::new(rest))
        }
        ":label" => {
            let (session, text) = match rest.split_once(char::is_whitespace) {
                Some((session, text)) => (session, text.trim()),
                None => (rest, ""),
            };
            if session.is_empty() {
                return Err(TailCommandError::MissingArgument {
                    command: ":label",
                    argument: "a session key",
                });
            }
            TailCommand::Label {
                session: SessionKey::new(session),
                text: text.to_string(),
            }
        }
        ":pin" => TailCommand::Pin,
        ":mode" => TailCommand::Mode,
        ":quit" | ":q" => TailCommand::Quit,
        _ => return Err(TailCommandError::Unknown(trimmed.to_string())),
    };
    Ok(Some(command))
}
