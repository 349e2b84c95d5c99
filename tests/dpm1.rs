#![cfg(feature = "phy-simulator")]
use profirust_dpm1::dp;
use profirust_dpm1::phy::{SimulatedSlave, SimulatorPhy};
use profirust_dpm1::time::Duration;
use profirust_dpm1::Baudrate;

const BAUDRATE: Baudrate = Baudrate::B500000;

fn parameters() -> dp::Parameters {
    dp::ParametersBuilder::new(0x02, BAUDRATE)
        .slot_bits(300)
        .build()
}

#[test]
fn remote_io_cycle() {
    let _ = env_logger::builder().is_test(true).try_init();

    let phy = SimulatorPhy::new(BAUDRATE);
    let observer = phy.duplicate();
    phy.add_slave(SimulatedSlave::new(8, 0x806a, &[0x10, 0x21]).with_inputs(&[0x05]));
    phy.add_slave(SimulatedSlave::new(9, 0x806a, &[0x10, 0x21]).with_inputs(&[0x06]));

    let mut storage: [dp::SlaveStorage; 4] = Default::default();
    let mut master = dp::DpMaster::new(&mut storage[..], phy, parameters());

    let mut catalog = dp::ModuleCatalog::new(0x806a)
        .with_user_parameters(&[0x00, 0x00, 0x00])
        .with_module("1DI", &[0x10], &[])
        .with_module("2DO", &[0x21], &[]);
    catalog.select_module("1DI").unwrap();
    catalog.select_module("2DO").unwrap();

    let handles: Vec<dp::SlaveHandle> = [8, 9]
        .into_iter()
        .map(|address| {
            let descriptor = dp::SlaveDescriptor::from_catalog(
                address,
                &catalog,
                &dp::Dpv1Parameters::new(),
            )
            .watchdog(Duration::from_millis(300))
            .build()
            .unwrap();
            master.add_slave(descriptor).unwrap()
        })
        .collect();

    master.initialize().unwrap();

    let mut inputs = Vec::new();
    for handle in &handles {
        let data = master.run_slave(*handle, &[0x03, 0x00]).unwrap();
        inputs.push(data.map(|d| d.to_vec()));
    }
    assert_eq!(inputs, [Some(vec![0x05]), Some(vec![0x06])]);
    assert_eq!(
        observer.with_slave(9, |s| s.outputs().to_vec()),
        Some(vec![0x03, 0x00])
    );

    observer.with_slave(8, |s| s.set_inputs(&[0x15])).unwrap();
    assert_eq!(
        master.run_slave(handles[0], &[0x00, 0x00]).unwrap(),
        Some(&[0x15][..])
    );

    master
        .global_control(dp::GlobalControl::new(dp::ControlCommand::SYNC))
        .unwrap();
    assert_eq!(
        observer.with_slave(8, |s| s.last_control()),
        Some(Some(dp::ControlCommand::SYNC))
    );

    master.destroy();
    master.destroy();
    assert!(observer.is_closed());
}

#[test]
fn silent_slave_fails_setup() {
    let _ = env_logger::builder().is_test(true).try_init();

    let phy = SimulatorPhy::new(BAUDRATE);
    phy.add_slave(SimulatedSlave::new(8, 0x806a, &[0x10]).with_inputs(&[0x05]));
    let mut master = dp::DpMaster::new(Vec::new(), phy, parameters());

    let present = master
        .add_slave(
            dp::SlaveDescriptor::builder(8, 0x806a)
                .config(&[0x10])
                .build()
                .unwrap(),
        )
        .unwrap();
    master
        .add_slave(
            dp::SlaveDescriptor::builder(12, 0x806a)
                .config(&[0x10])
                .build()
                .unwrap(),
        )
        .unwrap();

    let e = master.initialize().unwrap_err();
    let dp::DpError::Setup(setup) = &e else {
        panic!("unexpected error {e}");
    };
    assert_eq!(setup.failures().len(), 1);
    let failure = setup.first().unwrap();
    assert_eq!(failure.address, 12);
    assert_eq!(failure.state, dp::SlaveState::ParameterizationPending);
    assert_eq!(failure.fault, dp::SlaveFault::Timeout);

    // The other slave keeps running
    assert_eq!(master.run_slave(present, &[]).unwrap(), Some(&[0x05][..]));
}
