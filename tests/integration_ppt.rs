//! Contract tests for the structural invariants recorded while mutations
//! are applied and plans are rebuilt.

#![cfg(feature = "ppt")]

use auxide_rack::invariant_ppt::{
    contract_test, FAN_IN_SINGLE, FEEDBACK_SAMPLE_MODE, PLAN_SOUNDNESS, RESET_RESTORES_NORMAL,
};
use auxide_rack::units;
use auxide_rack::{Command, Driver, Engine, EngineConfig, Handle, OfflineBackend, Rack, Value};

#[test]
fn patching_enforces_single_source() {
    let mut rack = Rack::new(&EngineConfig::default());
    let a = rack.mount(units::sine(100.0)).unwrap();
    let b = rack.mount(units::sine(200.0)).unwrap();
    let sink = rack.sink();
    rack.patch_output(&a.port("out"), &sink.port("ch0")).unwrap();
    rack.patch_output(&b.port("out"), &sink.port("ch0")).unwrap();
    contract_test("single source", &[FAN_IN_SINGLE]);
}

#[test]
fn unpatch_is_idempotent_and_restores_normal() {
    let mut rack = Rack::new(&EngineConfig {
        block_size: 8,
        ..EngineConfig::default()
    });
    let osc = rack.mount(units::sine(100.0)).unwrap();
    let amp = rack.mount(units::gain(0.3)).unwrap();
    rack.patch_output(&osc.port("out"), &amp.port("gain")).unwrap();

    rack.unpatch(&amp.port("gain")).unwrap();
    let once: Vec<f32> = {
        let input = rack.unit(amp).unwrap().ports().input(1).unwrap();
        assert!(!input.is_coupled());
        (0..8).map(|i| input.read(i)).collect()
    };
    rack.unpatch(&amp.port("gain")).unwrap();
    let twice: Vec<f32> = {
        let input = rack.unit(amp).unwrap().ports().input(1).unwrap();
        (0..8).map(|i| input.read(i)).collect()
    };
    assert_eq!(once, twice);
    assert!(once.iter().all(|&s| s == 0.3));
    contract_test("reset restores normal", &[RESET_RESTORES_NORMAL]);
}

#[test]
fn feedback_plan_contracts() {
    let mut rack = Rack::new(&EngineConfig::default());
    let mix = rack.mount(units::mix()).unwrap();
    let amp = rack.mount(units::gain(0.5)).unwrap();
    rack.patch_output(&mix.port("out"), &amp.port("in")).unwrap();
    rack.patch_output(&amp.port("out"), &mix.port("a")).unwrap();
    rack.refresh_plan();
    contract_test("feedback plan", &[FEEDBACK_SAMPLE_MODE, PLAN_SOUNDNESS]);
}

fn applied(handle: &Handle, driver: &Driver, command: Command) -> Value {
    let pending = handle.send(command).unwrap();
    driver.run(1);
    pending.wait().unwrap().result.unwrap()
}

#[test]
fn audio_callback_records_structural_checks() {
    let config = EngineConfig {
        block_size: 16,
        ..EngineConfig::default()
    };
    let (backend, driver) = OfflineBackend::new(&config);
    let mut engine = Engine::new(config, Box::new(backend)).unwrap();
    engine.start().unwrap();
    let handle = engine.handle().unwrap();

    let mix = applied(&handle, &driver, Command::Mount(Box::new(units::mix())))
        .unit()
        .unwrap();
    let amp = applied(&handle, &driver, Command::Mount(Box::new(units::gain(0.5))))
        .unit()
        .unwrap();
    let forward = Command::Patch {
        source: mix.port("out").into(),
        input: amp.port("in"),
    };
    let back = Command::Patch {
        source: amp.port("out").into(),
        input: mix.port("a"),
    };
    applied(&handle, &driver, forward);
    applied(&handle, &driver, back);
    engine.stop().unwrap();

    // Applied and planned inside the run loop; recorded without a lock.
    contract_test(
        "callback checks",
        &[FAN_IN_SINGLE, FEEDBACK_SAMPLE_MODE, PLAN_SOUNDNESS],
    );
}
