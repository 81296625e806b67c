//! configuration space addressing
//!
//! Legacy layout: `bus[23:16] devfn[15:8] offset[7:0]`.
//! Extended layout: `bus[28:20] devfn[19:12] offset[11:0]`.

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CfgAddress {
    pub bus: u16,
    pub devfn: u8,
    pub offset: u16,
}

impl CfgAddress {
    pub fn new(bus: u16, devfn: u8, offset: u16) -> Self {
        Self { bus, devfn, offset }
    }

    pub fn decode(addr: u64, express: bool) -> Self {
        if express {
            Self {
                offset: (addr & 0xfff) as u16,
                devfn: ((addr >> 12) & 0xff) as u8,
                bus: ((addr >> 20) & 0x1ff) as u16,
            }
        } else {
            Self {
                offset: (addr & 0xff) as u16,
                devfn: ((addr >> 8) & 0xff) as u8,
                bus: ((addr >> 16) & 0xff) as u16,
            }
        }
    }

    pub fn encode(&self, express: bool) -> u64 {
        if express {
            ((self.bus as u64 & 0x1ff) << 20)
                | ((self.devfn as u64) << 12)
                | (self.offset as u64 & 0xfff)
        } else {
            ((self.bus as u64 & 0xff) << 16) | ((self.devfn as u64) << 8) | (self.offset as u64 & 0xff)
        }
    }

    pub fn slot(&self) -> u8 {
        self.devfn >> 3
    }

    pub fn function(&self) -> u8 {
        self.devfn & 0x7
    }
}

/// devfn of function `function` in slot `slot`
pub fn devfn(slot: u8, function: u8) -> u8 {
    (slot << 3) | (function & 0x7)
}
