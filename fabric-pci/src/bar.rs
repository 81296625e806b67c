use bitflags::bitflags;

use fabric_range::Range;

use crate::Error;

pub const PCI_NUM_BARS: u8 = 6;

bitflags! {
    /// Low bits of a base address register.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PciBarFlags: u32 {
        const IO = 1 << 0;
        const BIT64 = 1 << 2;
        const PREFETCH = 1 << 3;
    }
}

/// A relocatable window a device decodes, as programmed by the guest.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PciBar {
    pub number: u8,
    pub flags: PciBarFlags,
    pub address: u64,
    pub size: u64,
}

impl PciBar {
    pub fn mmio(number: u8, address: u64, size: u64) -> Self {
        Self {
            number,
            flags: PciBarFlags::empty(),
            address,
            size,
        }
    }

    pub fn io(number: u8, address: u64, size: u64) -> Self {
        Self {
            flags: PciBarFlags::IO,
            ..Self::mmio(number, address, size)
        }
    }

    pub fn with_flags(mut self, flags: PciBarFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn is_io(&self) -> bool {
        self.flags.contains(PciBarFlags::IO)
    }

    pub fn is_64bit(&self) -> bool {
        self.flags.contains(PciBarFlags::BIT64)
    }

    pub fn is_prefetch(&self) -> bool {
        self.flags.contains(PciBarFlags::PREFETCH)
    }

    /// address bits a power-of-two sized BAR decodes
    pub fn mask(&self) -> u64 {
        !self.size.wrapping_sub(1)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.number >= PCI_NUM_BARS {
            return Err(Error::InvalidBar(self.number));
        }
        if self.size == 0 {
            return Err(Error::EmptyBar(self.number));
        }
        Ok(())
    }

    /// bus addresses the BAR occupies
    pub fn range(&self) -> Result<Range, Error> {
        self.validate()?;
        Ok(Range::with_len(self.address, self.size)?)
    }
}
