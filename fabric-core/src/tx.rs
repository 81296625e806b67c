use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use fabric_range::Range;

/// Identifies the initiator an access is performed on behalf of.
pub type Owner = u32;

/// Tag distinguishing otherwise identical addresses routed through the
/// same target (e.g., the config, memory and I/O spaces of a PCI host).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressSpace(pub u16);

impl AddressSpace {
    pub const DEFAULT: Self = Self(0);
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "space#{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Read,
    Write,
    Ignore,
}

impl Command {
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read)
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write)
    }

    pub fn is_ignore(&self) -> bool {
        matches!(self, Self::Ignore)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Ignore => write!(f, "ignore"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    #[default]
    Incomplete,
    Ok,
    AddressError,
    CommandError,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::AddressError | Self::CommandError)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => write!(f, "incomplete"),
            Self::Ok => write!(f, "ok"),
            Self::AddressError => write!(f, "address error"),
            Self::CommandError => write!(f, "command error"),
        }
    }
}

bitflags! {
    /// Access rights attached to a direct window; the empty set means none.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Permission: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Permission {
    pub const NONE: Self = Self::empty();

    /// true if a command of kind `command` may go through a window with
    /// this permission
    pub fn allows(&self, command: Command) -> bool {
        match command {
            Command::Read => self.contains(Self::READ),
            Command::Write => self.contains(Self::WRITE),
            Command::Ignore => true,
        }
    }
}

impl From<Command> for Permission {
    fn from(command: Command) -> Self {
        match command {
            Command::Read => Self::READ,
            Command::Write => Self::WRITE,
            Command::Ignore => Self::NONE,
        }
    }
}

/// The parts of a transaction the exclusive monitor and direct-window
/// logic reason about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Access {
    pub range: Range,
    pub command: Command,
    pub owner: Owner,
    pub is_exclusive: bool,
}

impl Access {
    pub fn new(command: Command, owner: Owner, range: Range) -> Self {
        Self {
            range,
            command,
            owner,
            is_exclusive: false,
        }
    }

    pub fn read(owner: Owner, range: Range) -> Self {
        Self::new(Command::Read, owner, range)
    }

    pub fn write(owner: Owner, range: Range) -> Self {
        Self::new(Command::Write, owner, range)
    }

    pub fn exclusive(mut self) -> Self {
        self.is_exclusive = true;
        self
    }
}

/// A bus transaction. Owns its payload; `response` starts out
/// [`Response::Incomplete`] and is filled in by the fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub address: u64,
    pub command: Command,
    pub data: Vec<u8>,
    pub byte_enable: Option<Vec<u8>>,
    pub streaming_width: Option<usize>,
    pub is_debug: bool,
    pub is_exclusive: bool,
    pub owner: Owner,
    pub dmi_allowed: bool,
    pub response: Response,
}

impl Transaction {
    pub fn new(command: Command, address: u64, data: Vec<u8>) -> Self {
        Self {
            address,
            command,
            data,
            byte_enable: None,
            streaming_width: None,
            is_debug: false,
            is_exclusive: false,
            owner: 0,
            dmi_allowed: false,
            response: Response::Incomplete,
        }
    }

    pub fn read(address: u64, len: usize) -> Self {
        Self::new(Command::Read, address, vec![0; len])
    }

    pub fn write(address: u64, data: impl Into<Vec<u8>>) -> Self {
        Self::new(Command::Write, address, data.into())
    }

    pub fn ignore(address: u64, len: usize) -> Self {
        Self::new(Command::Ignore, address, vec![0; len])
    }

    pub fn with_owner(mut self, owner: Owner) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_byte_enable(mut self, mask: impl Into<Vec<u8>>) -> Self {
        self.byte_enable = Some(mask.into());
        self
    }

    pub fn with_streaming_width(mut self, width: usize) -> Self {
        self.streaming_width = Some(width);
        self
    }

    pub fn debug(mut self) -> Self {
        self.is_debug = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.is_exclusive = true;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// the addresses spanned by the payload
    pub fn range(&self) -> Result<Range, fabric_range::Error> {
        Range::with_len(self.address, self.data.len() as u64)
    }

    pub fn access(&self) -> Result<Access, fabric_range::Error> {
        Ok(Access {
            range: self.range()?,
            command: self.command,
            owner: self.owner,
            is_exclusive: self.is_exclusive,
        })
    }

    /// prepares the transaction for another trip through the fabric
    pub fn reset(&mut self) {
        self.response = Response::Incomplete;
        self.dmi_allowed = false;
    }
}
