//! AT command formatting.

use crate::error::AtError;
use std::fmt;

/// Line terminator appended to every command.
pub const AT_TERMINATOR: &str = "\r\n";

/// Syntactic shape of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AtAction {
    /// `AT<cmd>`
    #[default]
    Base,
    /// `AT<cmd>=<param>`
    Set,
    /// `AT<cmd>?`
    Read,
    /// `AT<cmd>=?`
    Test,
}

impl fmt::Display for AtAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtAction::Base => write!(f, "base"),
            AtAction::Set => write!(f, "set"),
            AtAction::Read => write!(f, "read"),
            AtAction::Test => write!(f, "test"),
        }
    }
}

/// Something that names an AT command.
///
/// Vendor vocabularies implement this on their command enums. Plain
/// strings work too; the empty mnemonic sends a bare `AT`.
pub trait AtCommand {
    /// Text between `AT` and the action suffix, e.g. `+CSQ`.
    fn mnemonic(&self) -> &str;
}

impl AtCommand for str {
    fn mnemonic(&self) -> &str {
        self
    }
}

impl AtCommand for String {
    fn mnemonic(&self) -> &str {
        self
    }
}

impl<T: AtCommand + ?Sized> AtCommand for &T {
    fn mnemonic(&self) -> &str {
        (**self).mnemonic()
    }
}

/// Renders a complete command line, terminator included.
///
/// `param` is required for [`AtAction::Set`] and ignored otherwise.
pub fn format_command(mnemonic: &str, action: AtAction, param: Option<&str>) -> Result<String, AtError> {
    let mut line = String::with_capacity(2 + mnemonic.len() + param.map_or(0, str::len) + 4);
    line.push_str("AT");
    line.push_str(mnemonic);
    match action {
        AtAction::Base => {}
        AtAction::Set => {
            let param = param.ok_or_else(|| AtError::MissingParameter {
                command: mnemonic.to_string(),
            })?;
            line.push('=');
            line.push_str(param);
        }
        AtAction::Read => line.push('?'),
        AtAction::Test => line.push_str("=?"),
    }
    line.push_str(AT_TERMINATOR);
    Ok(line)
}
