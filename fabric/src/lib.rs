#[cfg(feature = "pci")]
pub use fabric_pci as pci;

pub use fabric_core as core;
pub use fabric_range as range;
