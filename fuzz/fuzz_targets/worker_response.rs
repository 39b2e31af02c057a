#![no_main]

use libfuzzer_sys::fuzz_target;
use hashprobe::pipeline::parse_timing;

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        // Accepted timings are always usable samples
        if let Ok(timing) = parse_timing(line) {
            assert!(timing.is_finite() && timing >= 0.0);
        }
    }
});
