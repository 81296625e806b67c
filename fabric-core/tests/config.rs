use fabric_core::{
    AddressSpace, Alignment, Dispatcher, Response, Sink, SocketConfig, Transaction,
};

#[test]
fn partial_yaml_keeps_defaults() {
    let config: SocketConfig = serde_yaml::from_str(
        "
space: 2
max_access_size: 4
alignment: natural
streaming: false
read_latency: 10
",
    )
    .unwrap();

    assert_eq!(config.space, AddressSpace(2));
    assert_eq!(config.max_access_size, Some(4));
    assert_eq!(config.alignment, Alignment::Natural);
    assert!(!config.streaming);
    assert!(config.byte_enable);
    assert!(config.allow_dmi);
    assert_eq!(config.read_latency, 10);
    assert_eq!(config.write_latency, 0);
    assert_eq!(config.dmi_entry_limit, None);

    let mut port = Dispatcher::with_config(Sink::new(), config);
    let mut tx = Transaction::read(0x10, 4);
    let done = port.transport(&mut tx).unwrap();
    assert!(tx.response.is_ok());
    assert_eq!(done.cycles, 10);
    assert_eq!(port.target().seen()[0].2.space, AddressSpace(2));

    let mut tx = Transaction::read(0x11, 2);
    port.transport(&mut tx).unwrap();
    assert_eq!(tx.response, Response::CommandError);
}

#[test]
fn config_round_trips_through_yaml() {
    let config = SocketConfig::default()
        .with_alignment(Alignment::Aligned)
        .with_dmi(false)
        .with_dmi_entry_limit(Some(8))
        .with_latency(1, 2);
    let text = serde_yaml::to_string(&config).unwrap();
    let back: SocketConfig = serde_yaml::from_str(&text).unwrap();
    assert_eq!(back, config);
}

#[test]
fn unknown_alignment_is_rejected() {
    assert!(serde_yaml::from_str::<SocketConfig>("alignment: sideways").is_err());
}

#[test]
fn ranges_validate_on_load() {
    use fabric_core::Range;

    let range: Range = serde_yaml::from_str("{start: 16, end: 31}").unwrap();
    assert_eq!(range.length(), 16);
    assert!(serde_yaml::from_str::<Range>("{start: 32, end: 16}").is_err());
}
