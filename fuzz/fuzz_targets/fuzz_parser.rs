//! Fuzz the bloom-syntax parser with arbitrary strings.
//!
//! The parser should either return Ok or Err, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;

use bloom_syntax::BloomProgram;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = syn::parse_str::<BloomProgram>(input);
    }
});
