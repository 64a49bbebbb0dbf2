#![no_main]

use libfuzzer_sys::fuzz_target;

use watlite::wat::parse;

fuzz_target!(|data: &[u8]| {
    // Convert arbitrary bytes to a string (invalid UTF-8 becomes replacement chars)
    let source = String::from_utf8_lossy(data);

    // Anything that parses must print to text that parses back
    if let Ok(module) = parse(&source) {
        let flat = parse(&module.to_string());
        assert!(flat.is_ok(), "flat output failed to parse: {:?}", flat.err());
        let folded = parse(&module.folded().to_string());
        assert!(folded.is_ok(), "folded output failed to parse: {:?}", folded.err());
    }
});
