#![no_main]

use cvdkit::cvd::{HEADER_LEN, parse_header, write_header};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() != HEADER_LEN {
        return;
    }
    let mut bytes = [0u8; HEADER_LEN];
    bytes.copy_from_slice(data);

    let Ok(header) = parse_header(&bytes) else {
        return;
    };

    if let Ok(rewritten) = write_header(&header) {
        let reparsed = parse_header(&rewritten).expect("a header this crate wrote must parse");
        assert_eq!(reparsed, header);
    }
});
