//! Command grammar.
//!
//! A command line is a verb followed by whitespace-separated arguments.
//! Verbs are matched case-insensitively; arguments are kept verbatim.

use std::fmt;

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/join` (any host/port arguments are meant for the client and ignored here).
    Join,
    /// `/register <handle>`
    Register { handle: String },
    /// `/store <filename>`
    Store { filename: String },
    /// `/get <filename>`
    Get { filename: String },
    /// `/dir`
    Dir,
    /// `/leave`
    Leave,
    /// `/?`
    Help,
}

/// Why a line could not be turned into a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("command not found")]
    NotFound,

    #[error("command parameters do not match")]
    ParameterMismatch,
}

impl Command {
    /// Parses one command line.
    ///
    /// Every verb takes a fixed number of arguments and any other count is
    /// a [`CommandError::ParameterMismatch`]. `/join` is the one exception:
    /// clients send it as `/join <host> <port>`, and those arguments are
    /// ignored.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or(CommandError::NotFound)?;
        let args: Vec<&str> = parts.collect();

        match verb.to_ascii_lowercase().as_str() {
            "/join" => Ok(Self::Join),
            "/register" => single_arg(&args).map(|handle| Self::Register { handle }),
            "/store" => single_arg(&args).map(|filename| Self::Store { filename }),
            "/get" => single_arg(&args).map(|filename| Self::Get { filename }),
            "/dir" => no_args(&args).map(|()| Self::Dir),
            "/leave" => no_args(&args).map(|()| Self::Leave),
            "/?" => no_args(&args).map(|()| Self::Help),
            _ => Err(CommandError::NotFound),
        }
    }

    /// The command verb, including its leading slash.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Join => "/join",
            Self::Register { .. } => "/register",
            Self::Store { .. } => "/store",
            Self::Get { .. } => "/get",
            Self::Dir => "/dir",
            Self::Leave => "/leave",
            Self::Help => "/?",
        }
    }

    /// Whether the session must hold a handle before this command runs.
    pub fn requires_registration(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Get { .. } | Self::Dir)
    }
}

fn no_args(args: &[&str]) -> Result<(), CommandError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(CommandError::ParameterMismatch)
    }
}

fn single_arg(args: &[&str]) -> Result<String, CommandError> {
    match args {
        [arg] => Ok((*arg).to_string()),
        _ => Err(CommandError::ParameterMismatch),
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register { handle } => write!(f, "{} {handle}", self.verb()),
            Self::Store { filename } | Self::Get { filename } => {
                write!(f, "{} {filename}", self.verb())
            }
            _ => f.write_str(self.verb()),
        }
    }
}
