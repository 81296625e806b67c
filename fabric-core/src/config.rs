//! socket configuration
//!
//! Describes what a target socket accepts. Every field has a default, so a
//! configuration file only needs to name what it changes.

use serde::{Deserialize, Serialize};

use crate::AddressSpace;

/// alignment a socket demands of each access
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    #[default]
    Unrestricted,
    /// address must be a multiple of the access width
    Aligned,
    /// as `Aligned`, and the width must be 1, 2, 4 or 8 bytes
    Natural,
}

impl Alignment {
    pub fn permits(&self, address: u64, width: u64) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Aligned => width != 0 && address % width == 0,
            Self::Natural => {
                matches!(width, 1 | 2 | 4 | 8) && address % width == 0
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub space: AddressSpace,
    /// largest natural access width accepted, in bytes
    pub max_access_size: Option<u64>,
    pub alignment: Alignment,
    pub byte_enable: bool,
    pub streaming: bool,
    pub allow_dmi: bool,
    /// cycles charged per completed read sub-access
    pub read_latency: u64,
    /// cycles charged per completed write sub-access
    pub write_latency: u64,
    /// entries kept in the socket's grant cache; unbounded if `None`
    pub dmi_entry_limit: Option<usize>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            space: AddressSpace::DEFAULT,
            max_access_size: None,
            alignment: Alignment::Unrestricted,
            byte_enable: true,
            streaming: true,
            allow_dmi: true,
            read_latency: 0,
            write_latency: 0,
            dmi_entry_limit: None,
        }
    }
}

impl SocketConfig {
    pub fn with_space(mut self, space: AddressSpace) -> Self {
        self.space = space;
        self
    }

    pub fn with_max_access_size(mut self, size: u64) -> Self {
        self.max_access_size = Some(size);
        self
    }

    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_byte_enable(mut self, enabled: bool) -> Self {
        self.byte_enable = enabled;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    pub fn with_dmi(mut self, allowed: bool) -> Self {
        self.allow_dmi = allowed;
        self
    }

    pub fn with_latency(mut self, read: u64, write: u64) -> Self {
        self.read_latency = read;
        self.write_latency = write;
        self
    }

    pub fn with_dmi_entry_limit(mut self, limit: Option<usize>) -> Self {
        self.dmi_entry_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        assert!(Alignment::Unrestricted.permits(3, 4));
        assert!(Alignment::Aligned.permits(12, 4));
        assert!(!Alignment::Aligned.permits(13, 4));
        assert!(Alignment::Aligned.permits(0, 12));
        assert!(!Alignment::Natural.permits(0, 12));
        assert!(Alignment::Natural.permits(0x18, 8));
        assert!(!Alignment::Natural.permits(0x14, 8));
    }
}
