#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Fuzz TOML parsing of Config: it must never panic, and validate()
    // must reject bad values gracefully.
    let parsed = toml::from_str::<halldrive_config::Config>(data);
    match parsed {
        Ok(cfg) => {
            let _ = cfg.validate();
        }
        Err(_e) => {
            // parse error is acceptable
        }
    }
});
