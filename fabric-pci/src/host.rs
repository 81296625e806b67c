//! PCI host bridge
//!
//! The host sits behind three target sockets, one each for configuration,
//! memory and I/O space, and forwards register accesses to attached
//! devices. Memory and I/O accesses are decoded against the BARs devices
//! have mapped; configuration accesses are decoded by bus and devfn.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use fabric_core::{
    AccessInfo, Alignment, DirectWindow, Dispatcher, Invalidator, Response, SocketConfig, Target,
};
use fabric_range::Range;

use crate::{
    CfgAddress, Error, PciAddressSpace, PciBar, PciCommand, PciIrq, PciPayload, PciResponse,
    PCI_NUM_BARS,
};

pub trait PciDevice: Send {
    /// handles a configuration access (`space` is `Cfg`, `addr` the register
    /// offset) or a BAR access (`space` is `Bar(n)`, `addr` the offset into
    /// the BAR); must set `response`
    fn pci_transport(&mut self, tx: &mut PciPayload);

    /// host memory backing `range` of BAR `bar`, in BAR-relative addresses
    fn direct_window(&mut self, _bar: u8, _range: &Range) -> Option<DirectWindow> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PciHostConfig {
    /// decode configuration addresses with the extended layout
    pub express: bool,
    pub max_access_size: u64,
}

impl Default for PciHostConfig {
    fn default() -> Self {
        Self {
            express: false,
            max_access_size: 4,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Mapping {
    devfn: u8,
    bar: u8,
    range: Range,
    size_limit: u64,
}

pub type SharedPciHost = Arc<Mutex<PciHost>>;

pub struct PciHost {
    config: PciHostConfig,
    devices: BTreeMap<u8, Box<dyn PciDevice>>,
    mmio: Vec<Mapping>,
    io: Vec<Mapping>,
    irq: [BTreeSet<u8>; 4],
    invalidators: Vec<Invalidator>,
}

impl Default for PciHost {
    fn default() -> Self {
        Self::new(PciHostConfig::default())
    }
}

impl PciHost {
    pub fn new(config: PciHostConfig) -> Self {
        Self {
            config,
            devices: BTreeMap::new(),
            mmio: Vec::new(),
            io: Vec::new(),
            irq: Default::default(),
            invalidators: Vec::new(),
        }
    }

    pub fn config(&self) -> &PciHostConfig {
        &self.config
    }

    pub fn shared(self) -> SharedPciHost {
        Arc::new(Mutex::new(self))
    }

    /// what the socket serving `space` accepts
    pub fn socket_config(&self, space: PciAddressSpace) -> SocketConfig {
        SocketConfig::default()
            .with_space(space.into())
            .with_max_access_size(self.config.max_access_size)
            .with_alignment(Alignment::Natural)
            .with_streaming(false)
            .with_byte_enable(false)
            .with_dmi(space == PciAddressSpace::Mmio)
    }

    /// a target socket serving `space` of a shared host
    pub fn socket(host: &SharedPciHost, space: PciAddressSpace) -> Dispatcher<SharedPciHost> {
        let config = host.lock().socket_config(space);
        Dispatcher::with_config(host.clone(), config)
    }

    pub fn attach_device(&mut self, devfn: u8, device: impl PciDevice + 'static) -> Result<(), Error> {
        if self.devices.contains_key(&devfn) {
            return Err(Error::DeviceExists(devfn));
        }
        debug!("attaching PCI device at devfn {:#04x}", devfn);
        self.devices.insert(devfn, Box::new(device));
        Ok(())
    }

    /// removes a device, unmapping its BARs and releasing its interrupts
    pub fn detach_device(&mut self, devfn: u8) -> Result<Box<dyn PciDevice>, Error> {
        let device = self.devices.remove(&devfn).ok_or(Error::NoDevice(devfn))?;
        for bar in 0..PCI_NUM_BARS {
            self.unmap_bar(devfn, bar);
        }
        for line in self.irq.iter_mut() {
            line.remove(&devfn);
        }
        Ok(device)
    }

    pub fn has_device(&self, devfn: u8) -> bool {
        self.devices.contains_key(&devfn)
    }

    pub fn device_mut(&mut self, devfn: u8) -> Option<&mut (dyn PciDevice + 'static)> {
        self.devices.get_mut(&devfn).map(|d| d.as_mut())
    }

    /// maps `bar` of the device at `devfn`, replacing any earlier mapping of
    /// the same BAR
    pub fn map_bar(&mut self, devfn: u8, bar: &PciBar) -> Result<(), Error> {
        let range = bar.range()?;
        if !self.has_device(devfn) {
            return Err(Error::NoDevice(devfn));
        }

        self.unmap_bar(devfn, bar.number);

        let mapping = Mapping {
            devfn,
            bar: bar.number,
            range,
            size_limit: bar.size,
        };
        debug!(
            "devfn {:#04x} maps {} BAR{} at {}",
            devfn,
            if bar.is_io() { "io" } else { "mmio" },
            bar.number,
            range
        );
        if bar.is_io() {
            self.io.push(mapping);
        } else {
            self.mmio.push(mapping);
        }
        Ok(())
    }

    /// false if the BAR was not mapped
    pub fn unmap_bar(&mut self, devfn: u8, bar: u8) -> bool {
        let matches = |m: &Mapping| m.devfn == devfn && m.bar == bar;

        let removed = self.mmio.iter().filter(|m| matches(m)).copied().collect::<Vec<_>>();
        self.mmio.retain(|m| !matches(m));
        let io_before = self.io.len();
        self.io.retain(|m| !matches(m));

        for mapping in &removed {
            debug!("devfn {:#04x} unmaps BAR{} at {}", devfn, bar, mapping.range);
            for invalidator in &self.invalidators {
                invalidator.invalidate(&mapping.range);
            }
        }

        !removed.is_empty() || self.io.len() != io_before
    }

    /// current BAR mappings in decode order: `(devfn, bar, space, range)`
    pub fn bar_mappings(&self) -> impl Iterator<Item = (u8, u8, PciAddressSpace, Range)> + '_ {
        let mmio = self
            .mmio
            .iter()
            .map(|m| (m.devfn, m.bar, PciAddressSpace::Mmio, m.range));
        let io = self
            .io
            .iter()
            .map(|m| (m.devfn, m.bar, PciAddressSpace::Io, m.range));
        mmio.chain(io)
    }

    /// sets the level a device drives on one of its pins; returns the host
    /// line the pin is routed to
    pub fn interrupt(&mut self, devfn: u8, pin: PciIrq, state: bool) -> PciIrq {
        let line = pin.swizzle(devfn >> 3);
        let sources = &mut self.irq[line as usize];
        let was = !sources.is_empty();
        if state {
            sources.insert(devfn);
        } else {
            sources.remove(&devfn);
        }
        let is = !sources.is_empty();
        if was != is {
            debug!("IRQ line {:?} {}", line, if is { "raised" } else { "lowered" });
        }
        line
    }

    pub fn irq_line(&self, line: PciIrq) -> bool {
        !self.irq[line as usize].is_empty()
    }

    /// forwards a host-side access to the device it decodes to
    pub fn pci_transport(&mut self, tx: &mut PciPayload) {
        match tx.space {
            PciAddressSpace::Cfg => self.transport_cfg(tx),
            PciAddressSpace::Mmio => self.transport_bar(tx, false),
            PciAddressSpace::Io => self.transport_bar(tx, true),
            PciAddressSpace::Bar(_) => tx.response = PciResponse::CommandError,
        }
        trace!("{}", tx);
    }

    fn transport_cfg(&mut self, tx: &mut PciPayload) {
        let cfg = CfgAddress::decode(tx.addr, self.config.express);
        let device = if cfg.bus == 0 {
            self.devices.get_mut(&cfg.devfn)
        } else {
            None
        };

        match device {
            Some(device) => {
                tx.addr = cfg.offset as u64;
                device.pci_transport(tx);
                if tx.is_address_error() {
                    tx.response = PciResponse::Success;
                    tx.data = 0;
                }
            }
            None => {
                if tx.is_read() {
                    tx.data = tx.mask();
                }
                tx.response = PciResponse::Success;
            }
        }
    }

    fn transport_bar(&mut self, tx: &mut PciPayload, io: bool) {
        let mappings = if io { &self.io } else { &self.mmio };
        let Some(mapping) = mappings.iter().find(|m| m.range.includes(tx.addr)).copied() else {
            tx.response = PciResponse::AddressError;
            return;
        };

        let offset = tx.addr - mapping.range.start();
        if offset.saturating_add(tx.size as u64) > mapping.size_limit {
            tx.response = PciResponse::CommandError;
            return;
        }

        let Some(device) = self.devices.get_mut(&mapping.devfn) else {
            tx.response = PciResponse::AddressError;
            return;
        };
        tx.addr = offset;
        tx.space = PciAddressSpace::Bar(mapping.bar);
        device.pci_transport(tx);
    }

    fn payload(
        &self,
        command: PciCommand,
        range: &Range,
        len: usize,
        info: &AccessInfo,
    ) -> Result<PciPayload, Response> {
        let space = PciAddressSpace::try_from(info.space).map_err(|_| Response::AddressError)?;
        if len == 0 || len as u64 > self.config.max_access_size.min(8) {
            return Err(Response::CommandError);
        }
        Ok(PciPayload {
            command,
            response: PciResponse::Incomplete,
            space,
            addr: range.start(),
            data: 0,
            size: len as u32,
            debug: info.is_debug,
        })
    }
}

impl Target for PciHost {
    fn read(&mut self, range: &Range, data: &mut [u8], info: &AccessInfo) -> Response {
        let mut tx = match self.payload(PciCommand::Read, range, data.len(), info) {
            Ok(tx) => tx,
            Err(response) => return response,
        };
        self.pci_transport(&mut tx);
        if tx.is_ok() {
            LittleEndian::write_uint(data, tx.data & tx.mask(), data.len());
        }
        tx.response.into()
    }

    fn write(&mut self, range: &Range, data: &[u8], info: &AccessInfo) -> Response {
        let mut tx = match self.payload(PciCommand::Write, range, data.len(), info) {
            Ok(tx) => tx,
            Err(response) => return response,
        };
        tx.data = LittleEndian::read_uint(data, data.len());
        self.pci_transport(&mut tx);
        tx.response.into()
    }

    fn direct_window(&mut self, range: &Range, info: &AccessInfo) -> Option<DirectWindow> {
        if PciAddressSpace::try_from(info.space) != Ok(PciAddressSpace::Mmio) {
            return None;
        }

        let mapping = self.mmio.iter().find(|m| m.range.contains(range)).copied()?;
        let local = range.checked_sub(mapping.range.start()).ok()?;
        let window = self
            .devices
            .get_mut(&mapping.devfn)?
            .direct_window(mapping.bar, &local)?;

        let visible = Range::with_len(0, mapping.size_limit).ok()?;
        window
            .restrict(&visible)?
            .checked_add(mapping.range.start())
            .ok()
    }

    fn attach(&mut self, invalidator: Invalidator) {
        self.invalidators.push(invalidator);
    }
}
