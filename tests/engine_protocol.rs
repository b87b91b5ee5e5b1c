use auxide_rack::units;
use auxide_rack::{
    BackendError, Command, Driver, Engine, EngineConfig, EngineError, OfflineBackend, PatchError,
    State, ThreadBackend, UnitId,
};
use std::time::Duration;

fn config() -> EngineConfig {
    EngineConfig {
        block_size: 16,
        drain_limit: 256,
        ..EngineConfig::default()
    }
}

fn offline(config: EngineConfig) -> (Engine, Driver) {
    let (backend, driver) = OfflineBackend::new(&config);
    let mut engine = Engine::new(config, Box::new(backend)).unwrap();
    engine.start().unwrap();
    (engine, driver)
}

#[test]
fn replies_arrive_in_send_order_one_block_apart() {
    let (engine, driver) = offline(config());
    let handle = engine.handle().unwrap();
    let pending: Vec<_> = (0..5)
        .map(|_| handle.send(Command::Mount(Box::new(units::blank()))).unwrap())
        .collect();

    driver.run(5);
    let replies: Vec<_> = pending.into_iter().map(|p| p.wait().unwrap()).collect();
    let blocks: Vec<u64> = replies.iter().map(|r| r.block).collect();
    assert_eq!(blocks, vec![0, 1, 2, 3, 4]);
    let ids: Vec<UnitId> = replies
        .iter()
        .map(|r| r.result.as_ref().unwrap().unit().unwrap())
        .collect();
    assert!(ids.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn backlog_is_spread_across_blocks() {
    let (engine, driver) = offline(config());
    let handle = engine.handle().unwrap();
    let pending: Vec<_> = (0..3)
        .map(|_| handle.send(Command::Inspect).unwrap())
        .collect();

    driver.run(1);
    let ready: Vec<bool> = pending.iter().map(|p| p.try_reply().is_some()).collect();
    assert_eq!(ready, vec![true, false, false]);
}

#[test]
fn graph_size_example() {
    let (engine, driver) = offline(config());
    let handle = engine.handle().unwrap();
    let inspect = |driver: &Driver| {
        let pending = handle.send(Command::Inspect).unwrap();
        driver.run(1);
        match pending.wait().unwrap().result.unwrap() {
            auxide_rack::Value::Snapshot(s) => s.size,
            other => panic!("unexpected {:?}", other),
        }
    };

    assert_eq!(inspect(&driver), 3);
    let mounted = handle.send(Command::Mount(Box::new(units::blank()))).unwrap();
    driver.run(1);
    let id = mounted.wait().unwrap().result.unwrap().unit().unwrap();
    assert_eq!(inspect(&driver), 4);
    let unmounted = handle.send(Command::Unmount(id)).unwrap();
    driver.run(1);
    unmounted.wait().unwrap().result.unwrap();
    assert_eq!(inspect(&driver), 3);
}

#[test]
fn structural_errors_travel_in_the_reply() {
    let (engine, driver) = offline(config());
    let handle = engine.handle().unwrap();
    let pending = handle
        .send(Command::Unpatch(UnitId(0).port("missing")))
        .unwrap();
    driver.run(1);
    let reply = pending.wait().unwrap();
    assert!(matches!(reply.result, Err(PatchError::UnknownPort { .. })));
    assert!(engine.errors().is_empty());
}

#[test]
fn stop_applies_queued_requests_first() {
    let (mut engine, _driver) = offline(config());
    let handle = engine.handle().unwrap();
    let pending = handle.send(Command::Mount(Box::new(units::mix()))).unwrap();
    engine.stop().unwrap();
    assert!(pending.wait().unwrap().result.is_ok());
    assert_eq!(engine.state(), State::Stopped);
    assert_eq!(
        handle.send(Command::Inspect).unwrap_err(),
        EngineError::NotRunning
    );
    assert_eq!(engine.stop(), Err(EngineError::NotRunning));
}

#[test]
fn stop_timeout_disconnects_unanswered_requests() {
    let (mut engine, _driver) = offline(EngineConfig {
        drain_limit: 2,
        ..config()
    });
    let handle = engine.handle().unwrap();
    let pending: Vec<_> = (0..5)
        .map(|_| handle.send(Command::Inspect).unwrap())
        .collect();
    drop(handle);

    assert_eq!(
        engine.stop(),
        Err(EngineError::Backend(BackendError::StopTimeout))
    );
    assert_eq!(engine.errors(), vec![BackendError::StopTimeout]);
    let results: Vec<_> = pending.into_iter().map(|p| p.wait().is_ok()).collect();
    assert_eq!(results, vec![true, true, false, false, false]);
}

#[test]
fn engine_can_restart_with_a_fresh_rack() {
    let (mut engine, driver) = offline(config());
    let handle = engine.handle().unwrap();
    let pending = handle.send(Command::Mount(Box::new(units::blank()))).unwrap();
    driver.run(1);
    pending.wait().unwrap();
    engine.stop().unwrap();

    engine.start().unwrap();
    let pending = engine.handle().unwrap().send(Command::Inspect).unwrap();
    driver.run(1);
    match pending.wait().unwrap().result.unwrap() {
        auxide_rack::Value::Snapshot(s) => assert_eq!(s.units, 1),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn thread_backend_answers_synchronous_requests() {
    let config = config();
    let backend = ThreadBackend::new(&config).paced(&config);
    let mut engine = Engine::new(config, Box::new(backend)).unwrap();
    engine.start().unwrap();
    let handle = engine.handle().unwrap();

    let osc = handle.mount(units::sine(330.0)).unwrap();
    handle.emit(osc.port("out"), None).unwrap();
    let snapshot = handle.inspect().unwrap();
    assert_eq!(snapshot.units, 2);
    assert_eq!(
        handle.unmount(UnitId(1234)),
        Err(EngineError::Patch(PatchError::UnknownUnit(UnitId(1234))))
    );

    let pending = handle.send(Command::Inspect).unwrap();
    assert!(pending.wait_timeout(Duration::from_secs(5)).is_ok());
    engine.stop().unwrap();
    assert!(!handle.is_open());
}

#[test]
fn panicking_unit_reports_on_error_channel() {
    struct Explode;
    impl auxide_rack::Processor for Explode {
        fn process_sample(&mut self, _ports: &auxide_rack::port::Ports, _index: usize) {
            panic!("unit exploded");
        }
    }

    let config = config();
    let mut engine = Engine::new(config.clone(), Box::new(ThreadBackend::new(&config))).unwrap();
    engine.start().unwrap();
    let handle = engine.handle().unwrap();
    let unit = auxide_rack::Unit::new("explode")
        .output("out")
        .with_processor(Explode);
    let pending = handle.send(Command::Mount(Box::new(unit))).unwrap();
    // The mount is applied, then the very next plan execution panics.
    assert!(pending.wait().is_ok());

    let mut errors = Vec::new();
    for _ in 0..200 {
        errors = engine.errors();
        if !errors.is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(errors, vec![BackendError::Panicked]);

    // The dead loop takes the engine out of Running.
    for _ in 0..200 {
        if engine.state() == State::Stopped {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(engine.state(), State::Stopped);
    assert!(!handle.is_open());
    assert_eq!(engine.handle().unwrap_err(), EngineError::NotRunning);
    assert_eq!(
        handle.send(Command::Inspect).unwrap_err(),
        EngineError::NotRunning
    );
    assert_eq!(
        engine.stop(),
        Err(EngineError::Backend(BackendError::Halted))
    );
    assert_eq!(engine.stop(), Err(EngineError::NotRunning));
}

#[test]
fn engine_restarts_after_loop_dies() {
    struct Explode;
    impl auxide_rack::Processor for Explode {
        fn process_sample(&mut self, _ports: &auxide_rack::port::Ports, _index: usize) {
            panic!("unit exploded");
        }
    }

    let config = config();
    let mut engine = Engine::new(config.clone(), Box::new(ThreadBackend::new(&config))).unwrap();
    engine.start().unwrap();
    let unit = auxide_rack::Unit::new("explode")
        .output("out")
        .with_processor(Explode);
    let _ = engine.handle().unwrap().mount(unit);
    for _ in 0..200 {
        if engine.state() == State::Stopped {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(engine.state(), State::Stopped);

    // Start collects the dead loop and brings up a fresh rack.
    engine.start().unwrap();
    assert_eq!(engine.state(), State::Running);
    let snapshot = engine.handle().unwrap().inspect().unwrap();
    assert_eq!(snapshot.units, 1);
    engine.stop().unwrap();
    assert_eq!(engine.errors(), vec![BackendError::Panicked]);
}
