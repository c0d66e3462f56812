#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    let Ok(cfg) = toml::from_str::<dispenser_config::Config>(data) else {
        return;
    };
    if cfg.validate().is_err() {
        return;
    }
    // A validated config must map onto the core types.
    let map = dispenser_core::ChannelMap::try_from(&cfg);
    assert!(map.is_ok(), "validated mapping rejected: {map:?}");
    for row in &cfg.schedules {
        let _ = dispenser_core::NewSchedule::try_from(row);
    }
});
