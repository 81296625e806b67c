pub use fabric_range::{Range, Split};

pub mod error;
pub use error::Error;

pub mod tx;
pub use tx::*;

pub mod dmi;
pub use dmi::{DirectWindow, DmiCache, HostPtr, Invalidator, SharedDmiCache};

pub mod exmon;
pub use exmon::{ExclusiveMonitor, Reservation};

pub mod config;
pub use config::{Alignment, SocketConfig};

pub mod clock;
pub use clock::{Clock, Cycles};

pub mod target;
pub use target::{AccessInfo, Sink, Target};

pub mod dispatch;
pub use dispatch::{decompose, Dispatched, Dispatcher, SubAccess, Transport};

pub mod initiator;
pub use initiator::{Completion, InitiatorSocket, Sideband};

pub mod memory;
pub use memory::Memory;

pub mod bus;
pub use bus::{BoxedTarget, Bus};
