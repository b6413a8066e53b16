#![no_main]

use blocktimer::ProfileOptions;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // stats_sink paths are only opened when a report is written
        let _ = ProfileOptions::from_spec(input);
    }
});
