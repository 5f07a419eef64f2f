//! IRC protocol message type.

use std::fmt;

/// Maximum accepted IRC message size, delimiter included.
pub const MAX_MESSAGE_LEN: usize = 512;

/// An owned IRC message: optional prefix, command, and arguments.
///
/// The validity checks are more relaxed than the protocol grammar. The
/// parser accepts any non-space bytes inside the command, and the writer
/// does not second-guess the caller; in particular, only the last argument
/// may contain a space.
///
/// # Example
///
/// ```
/// use murk_proto::Message;
///
/// let msg = Message::parse(b":irc.server 001 mynick :Welcome").unwrap();
/// assert_eq!(msg.command, "001");
/// assert_eq!(msg.args, vec!["mynick".to_string(), "Welcome".to_string()]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    /// Message prefix, without the leading `:`. May be empty.
    pub prefix: String,
    /// The IRC command or numeric.
    pub command: String,
    /// Command arguments in order.
    pub args: Vec<String>,
}

impl Message {
    /// Starts a message with the given command and no arguments.
    pub fn cmd(command: impl Into<String>) -> Message {
        Message {
            prefix: String::new(),
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Message {
        self.args.push(arg.into());
        self
    }

    /// Appends a sequence of arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Message
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the message prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Message {
        self.prefix = prefix.into();
        self
    }

    /// Parses an IRC protocol message from `data`.
    ///
    /// The input must not contain CR or LF bytes (the line codec strips
    /// them). Returns `None` when the bytes do not form a valid message.
    /// Never reads past `data`; a truncated input parses as whatever
    /// complete tokens it contains.
    pub fn parse(data: &[u8]) -> Option<Message> {
        let mut rest = data;

        // prefix
        let mut prefix = String::new();
        if let [b':', after @ ..] = rest {
            let space = after.iter().position(|&b| b == b' ')?;
            prefix = lossy(&after[..space]);
            rest = &after[space..];
        }

        while let [b' ', after @ ..] = rest {
            rest = after;
        }

        // command
        let command_len = rest
            .iter()
            .position(|&b| b == b' ')
            .unwrap_or(rest.len());
        if command_len == 0 {
            return None;
        }
        let command = lossy(&rest[..command_len]);
        rest = &rest[command_len..];

        // arguments, the trailing one marked with ':'
        let mut args = Vec::new();
        loop {
            while let [b' ', after @ ..] = rest {
                rest = after;
            }
            match rest {
                [] => break,
                [b':', trailing @ ..] => {
                    args.push(lossy(trailing));
                    break;
                }
                _ => {
                    let arg_len = rest
                        .iter()
                        .position(|&b| b == b' ')
                        .unwrap_or(rest.len());
                    args.push(lossy(&rest[..arg_len]));
                    rest = &rest[arg_len..];
                }
            }
        }

        Some(Message {
            prefix,
            command,
            args,
        })
    }

    /// Serialises the message into `out` without the CR-LF delimiter.
    ///
    /// This is the inverse of [`parse`](Self::parse). The last argument is
    /// written with a leading `:` when it contains a space.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        if !self.prefix.is_empty() {
            out.push(b':');
            out.extend_from_slice(self.prefix.as_bytes());
            out.push(b' ');
        }
        out.extend_from_slice(self.command.as_bytes());
        for (i, arg) in self.args.iter().enumerate() {
            out.push(b' ');
            if i == self.args.len() - 1 && arg.contains(' ') {
                out.push(b':');
            }
            out.extend_from_slice(arg.as_bytes());
        }
    }

    /// Returns the nick portion of a `nick!user@host` prefix.
    ///
    /// All three parts must be non-empty; otherwise `None`.
    pub fn prefix_nick(&self) -> Option<&str> {
        let (nick, rest) = self.prefix.split_once('!')?;
        let (user, host) = rest.split_once('@')?;
        if nick.is_empty() || user.is_empty() || host.is_empty() {
            return None;
        }
        Some(nick)
    }

    /// Tests the command field, ASCII-case-insensitively.
    pub fn command_is(&self, test: &str) -> bool {
        self.command.eq_ignore_ascii_case(test)
    }

    /// Tests whether argument `n` exists and matches, ASCII-case-insensitively.
    pub fn arg_is(&self, n: usize, test: &str) -> bool {
        self.args
            .get(n)
            .is_some_and(|a| a.eq_ignore_ascii_case(test))
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = Vec::new();
        self.write_to(&mut out);
        f.write_str(&String::from_utf8_lossy(&out))
    }
}
