//! Fuzz the full parse → lower → tick pipeline.
//!
//! If a program lowers successfully, running a few ticks must not panic.
//! Errors (key conflicts, runaway fixpoints) are fine.

#![no_main]

use libfuzzer_sys::fuzz_target;

use bloom_eval::{CollectSink, Collaborators, Engine, EngineConfig};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(program) = bloom_ir::compile(input) else {
        return;
    };
    let config = EngineConfig {
        max_iterations: Some(1_000),
        ..EngineConfig::default()
    };
    let io = Collaborators::new(CollectSink::new());
    if let Ok(mut engine) = Engine::with_collaborators(program, config, io) {
        for _ in 0..4 {
            if engine.tick().is_err() {
                break;
            }
        }
    }
});
