#![no_main]

use libfuzzer_sys::fuzz_target;

use transcript_assets::assets::filename::{sanitize_filename, MAX_FILENAME_LEN};

fuzz_target!(|data: &str| {
    let once = sanitize_filename(data);
    assert!(once.chars().count() <= MAX_FILENAME_LEN);
    assert!(!once.chars().any(|c| c.is_control()));
    assert!(!once.chars().any(|c| matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')));
    assert_eq!(sanitize_filename(&once), once);
});
