use std::sync::Arc;

use parking_lot::Mutex;

use fabric_core::{
    Access, Bus, Command, DirectWindow, Dispatcher, DmiCache, ExclusiveMonitor, HostPtr,
    InitiatorSocket, Memory, Permission, Range, Response, Sideband, Sink, Transaction,
};

fn r(start: u64, end: u64) -> Range {
    Range::new(start, end).unwrap()
}

fn init() {
    env_logger::builder().is_test(true).try_init().ok();
}

#[test]
fn coalescing_inserts() {
    init();

    let base = 0x1_0000usize;
    let window = |start: u64, end: u64| {
        DirectWindow::new(
            r(start, end),
            HostPtr::new((base + start as usize) as *mut u8),
            Permission::READ_WRITE,
        )
    };
    let entries = |cache: &DmiCache| cache.iter().map(|w| w.range()).collect::<Vec<_>>();

    let mut cache = DmiCache::new();
    cache.insert(window(0, 1000));
    cache.insert(window(900, 1100));
    assert_eq!(entries(&cache), vec![r(0, 1100)]);

    cache.insert(window(1200, 1500));
    assert_eq!(entries(&cache), vec![r(0, 1100), r(1200, 1500)]);

    cache.insert(window(1000, 1200));
    assert_eq!(entries(&cache), vec![r(0, 1500)]);
}

#[test]
fn windows_around_reservations() {
    init();

    let mut monitor = ExclusiveMonitor::new();
    monitor.add_lock(0, r(100, 199));
    monitor.add_lock(1, r(300, 399));

    let grant = |address: u64| {
        let mut window = DirectWindow::new(Range::full(), HostPtr::null(), Permission::READ_WRITE);
        monitor
            .override_dmi(&Access::read(0, Range::at(address)), &mut window)
            .then(|| window.range())
    };

    assert_eq!(grant(50), Some(r(0, 99)));
    assert_eq!(grant(399), None);
    assert_eq!(grant(400), Some(r(400, u64::MAX)));
    assert_eq!(grant(150), None);
    assert_eq!(grant(250), Some(r(200, 299)));

    let mut window = DirectWindow::new(Range::full(), HostPtr::null(), Permission::READ_WRITE);
    assert!(monitor.override_dmi(&Access::read(0, r(399, 402)), &mut window));
    assert_eq!(window.range(), r(400, u64::MAX));
}

#[test]
fn plain_write_clears_every_reservation() {
    init();

    let mut port = Dispatcher::new(Memory::new(0x200));
    let cpu1 = InitiatorSocket::new(1);
    let cpu2 = InitiatorSocket::new(2);
    let cpu3 = InitiatorSocket::new(3);

    let mut data = [0u8; 4];
    cpu1.read(&mut port, 100, &mut data, Sideband::EXCLUSIVE).unwrap();
    assert_eq!(port.monitor().locks().len(), 1);
    cpu2.read(&mut port, 100, &mut data, Sideband::EXCLUSIVE).unwrap();
    assert_eq!(port.monitor().locks().len(), 2);

    cpu3.write(&mut port, 100, &[0; 4], Sideband::NONE).unwrap();
    assert!(port.monitor().locks().is_empty());

    let done = cpu1.write(&mut port, 100, &[1; 4], Sideband::EXCLUSIVE).unwrap();
    assert_eq!(done.response, Response::CommandError);
    assert_eq!(port.target().as_slice()[100], 0);
}

#[test]
fn successful_store_conditional_breaks_other_owners() {
    init();

    let mut port = Dispatcher::new(Memory::new(0x200));
    let cpu1 = InitiatorSocket::new(1);
    let cpu2 = InitiatorSocket::new(2);

    let mut data = [0u8; 4];
    cpu1.read(&mut port, 0x80, &mut data, Sideband::EXCLUSIVE).unwrap();
    cpu2.read(&mut port, 0x80, &mut data, Sideband::EXCLUSIVE).unwrap();

    assert!(cpu2.write(&mut port, 0x80, &[2; 4], Sideband::EXCLUSIVE).unwrap().is_ok());
    assert!(port.monitor().locks().is_empty());

    let done = cpu1.write(&mut port, 0x80, &[1; 4], Sideband::EXCLUSIVE).unwrap();
    assert_eq!(done.response, Response::CommandError);
    assert_eq!(&port.target().as_slice()[0x80..0x84], &[2; 4]);
}

#[test]
fn byte_enabled_write() {
    init();

    let mut port = Dispatcher::new(Sink::new());
    let mut tx = Transaction::write(4, [0xa, 0xb, 0xc, 0xd]).with_byte_enable([0xffu8, 0x00, 0xff, 0x00]);
    let done = port.transport(&mut tx).unwrap();

    assert!(tx.response.is_ok());
    assert_eq!(done.accesses, 2);
    assert_eq!(done.bytes, 2);

    let seen = port
        .target()
        .seen()
        .iter()
        .map(|(command, range, _)| (*command, *range))
        .collect::<Vec<_>>();
    assert_eq!(seen, vec![(Command::Write, Range::at(4)), (Command::Write, Range::at(6))]);
}

#[test]
fn streaming_into_fixed_port() {
    init();

    let mut port = Dispatcher::new(Sink::new());
    let mut tx = Transaction::write(0x30, [1u8, 2, 3, 4, 5, 6, 7, 8]).with_streaming_width(4);
    let done = port.transport(&mut tx).unwrap();

    assert!(tx.response.is_ok());
    assert_eq!(done.accesses, 2);
    assert!(port
        .target()
        .seen()
        .iter()
        .all(|(_, range, _)| *range == r(0x30, 0x33)));
}

#[test]
fn bus_behind_socket() {
    init();

    let mut bus = Bus::new();
    bus.map(r(0x8000_0000, 0x8000_ffff), Memory::new(0x1_0000)).unwrap();
    bus.map(r(0x9000_0000, 0x9000_00ff), Sink::with_fill(0xff)).unwrap();

    let mut port = Dispatcher::new(bus);
    let cpu = InitiatorSocket::new(0);
    cpu.bind(&mut port);

    cpu.write(&mut port, 0x8000_0100, &[1, 2, 3, 4], Sideband::NONE).unwrap();
    let mut data = [0u8; 4];
    let done = cpu.read(&mut port, 0x8000_0100, &mut data, Sideband::NONE).unwrap();
    assert!(done.direct);
    assert_eq!(data, [1, 2, 3, 4]);

    let done = cpu.read(&mut port, 0x9000_0000, &mut data, Sideband::NONE).unwrap();
    assert!(done.is_ok() && !done.direct);
    assert_eq!(data, [0xff; 4]);

    let done = cpu.read(&mut port, 0x7000_0000, &mut data, Sideband::NONE).unwrap();
    assert_eq!(done.response, Response::AddressError);

    assert!(port.target_mut().unmap(&r(0x8000_0000, 0x8000_ffff)).is_ok());
    assert!(cpu
        .lookup_dmi_ptr(&r(0x8000_0100, 0x8000_0103), Command::Read)
        .is_none());
    let done = cpu.read(&mut port, 0x8000_0100, &mut data, Sideband::NONE).unwrap();
    assert_eq!(done.response, Response::AddressError);
}

#[test]
fn memory_behind_bus_turns_read_only() {
    init();

    let mem = Arc::new(Mutex::new(Memory::new(0x100)));
    let mut bus = Bus::new();
    bus.map(r(0x1000, 0x10ff), mem.clone()).unwrap();

    let mut port = Dispatcher::new(bus);
    let cpu = InitiatorSocket::new(0);
    cpu.bind(&mut port);

    let mut data = [0u8; 4];
    cpu.read(&mut port, 0x1000, &mut data, Sideband::NONE).unwrap();
    assert!(cpu.lookup_dmi_ptr(&r(0x1000, 0x1000), Command::Write).is_some());

    mem.lock().set_readonly(true);
    assert!(cpu.lookup_dmi_ptr(&r(0x1000, 0x1000), Command::Write).is_none());

    let done = cpu.write(&mut port, 0x1000, &[7], Sideband::NONE).unwrap();
    assert_eq!(done.response, Response::CommandError);
    assert!(!done.direct);
    assert_eq!(mem.lock().as_slice()[0], 0);

    cpu.read(&mut port, 0x1000, &mut data, Sideband::NONE).unwrap();
    let window = cpu.cache().lock().lookup(0x1000, 4, Command::Read).unwrap();
    assert_eq!(window.permission(), Permission::READ);
}
