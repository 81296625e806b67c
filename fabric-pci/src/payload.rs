use std::fmt;

use serde::{Deserialize, Serialize};

use fabric_core::{AddressSpace, Command, Response};

use crate::PCI_NUM_BARS;

/// Address spaces seen by a PCI host and its devices.
///
/// The host decodes `Cfg`, `Mmio` and `Io`; devices receive either `Cfg`
/// with a register offset or `Bar(n)` with an offset into that BAR.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PciAddressSpace {
    Cfg,
    Mmio,
    Io,
    Bar(u8),
}

impl PciAddressSpace {
    pub fn is_bar(&self) -> bool {
        matches!(self, Self::Bar(_))
    }
}

impl From<PciAddressSpace> for AddressSpace {
    fn from(space: PciAddressSpace) -> Self {
        match space {
            PciAddressSpace::Cfg => AddressSpace(0),
            PciAddressSpace::Mmio => AddressSpace(1),
            PciAddressSpace::Io => AddressSpace(2),
            PciAddressSpace::Bar(n) => AddressSpace(3 + n as u16),
        }
    }
}

impl TryFrom<AddressSpace> for PciAddressSpace {
    type Error = AddressSpace;

    fn try_from(space: AddressSpace) -> Result<Self, Self::Error> {
        match space.0 {
            0 => Ok(Self::Cfg),
            1 => Ok(Self::Mmio),
            2 => Ok(Self::Io),
            n if n >= 3 && n < 3 + PCI_NUM_BARS as u16 => Ok(Self::Bar((n - 3) as u8)),
            _ => Err(space),
        }
    }
}

impl fmt::Display for PciAddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cfg => write!(f, "cfg"),
            Self::Mmio => write!(f, "mmio"),
            Self::Io => write!(f, "io"),
            Self::Bar(n) => write!(f, "bar{}", n),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PciCommand {
    Read,
    Write,
}

impl PciCommand {
    /// `None` for commands with no PCI counterpart
    pub fn from_command(command: Command) -> Option<Self> {
        match command {
            Command::Read => Some(Self::Read),
            Command::Write => Some(Self::Write),
            Command::Ignore => None,
        }
    }
}

impl From<PciCommand> for Command {
    fn from(command: PciCommand) -> Self {
        match command {
            PciCommand::Read => Command::Read,
            PciCommand::Write => Command::Write,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum PciResponse {
    #[default]
    Incomplete,
    Success,
    AddressError,
    CommandError,
}

impl PciResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::AddressError | Self::CommandError)
    }
}

impl From<PciResponse> for Response {
    fn from(response: PciResponse) -> Self {
        match response {
            PciResponse::Incomplete => Response::Incomplete,
            PciResponse::Success => Response::Ok,
            PciResponse::AddressError => Response::AddressError,
            PciResponse::CommandError => Response::CommandError,
        }
    }
}

impl From<Response> for PciResponse {
    fn from(response: Response) -> Self {
        match response {
            Response::Incomplete => PciResponse::Incomplete,
            Response::Ok => PciResponse::Success,
            Response::AddressError => PciResponse::AddressError,
            Response::CommandError => PciResponse::CommandError,
        }
    }
}

/// Legacy interrupt pins.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
pub enum PciIrq {
    A,
    B,
    C,
    D,
}

impl PciIrq {
    pub const ALL: [PciIrq; 4] = [Self::A, Self::B, Self::C, Self::D];

    /// pin number as found in the interrupt pin register (A = 1)
    pub fn pin(&self) -> u8 {
        *self as u8 + 1
    }

    pub fn from_pin(pin: u8) -> Option<Self> {
        Self::ALL.get(pin.checked_sub(1)? as usize).copied()
    }

    /// the host line a device in `slot` asserting this pin drives
    pub fn swizzle(&self, slot: u8) -> PciIrq {
        Self::ALL[(*self as usize + slot as usize) % 4]
    }
}

/// A single register-sized access between a PCI host and a device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PciPayload {
    pub command: PciCommand,
    pub response: PciResponse,
    pub space: PciAddressSpace,
    pub addr: u64,
    pub data: u64,
    pub size: u32,
    pub debug: bool,
}

impl PciPayload {
    pub fn read(space: PciAddressSpace, addr: u64, size: u32) -> Self {
        Self {
            command: PciCommand::Read,
            response: PciResponse::Incomplete,
            space,
            addr,
            data: 0,
            size,
            debug: false,
        }
    }

    pub fn write(space: PciAddressSpace, addr: u64, data: u64, size: u32) -> Self {
        Self {
            command: PciCommand::Write,
            data,
            ..Self::read(space, addr, size)
        }
    }

    pub fn is_read(&self) -> bool {
        self.command == PciCommand::Read
    }

    pub fn is_write(&self) -> bool {
        self.command == PciCommand::Write
    }

    pub fn is_cfg(&self) -> bool {
        self.space == PciAddressSpace::Cfg
    }

    pub fn is_ok(&self) -> bool {
        self.response.is_ok()
    }

    pub fn is_error(&self) -> bool {
        self.response.is_error()
    }

    pub fn is_address_error(&self) -> bool {
        self.response == PciResponse::AddressError
    }

    pub fn is_command_error(&self) -> bool {
        self.response == PciResponse::CommandError
    }

    /// all ones in the low `size` bytes
    pub fn mask(&self) -> u64 {
        match self.size {
            0 => 0,
            n if n >= 8 => u64::MAX,
            n => (1u64 << (n * 8)) - 1,
        }
    }
}

impl fmt::Display for PciPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command = match self.command {
            PciCommand::Read => "read",
            PciCommand::Write => "write",
        };
        write!(
            f,
            "pci {} {}:{:#x} [{:#0width$x}] ({:?})",
            command,
            self.space,
            self.addr,
            self.data & self.mask(),
            self.response,
            width = self.size as usize * 2 + 2,
        )
    }
}
