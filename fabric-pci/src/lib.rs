pub mod error;
pub use error::Error;

pub mod payload;
pub use payload::{PciAddressSpace, PciCommand, PciIrq, PciPayload, PciResponse};

pub mod bar;
pub use bar::{PciBar, PciBarFlags, PCI_NUM_BARS};

pub mod cfg;
pub use cfg::{devfn, CfgAddress};

pub mod host;
pub use host::{PciDevice, PciHost, PciHostConfig, SharedPciHost};
