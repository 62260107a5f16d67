#![no_main]

use cvdkit::patch::parse_script;
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &str| {
    for command in parse_script(Cursor::new(data)) {
        let _ = command;
    }
});
