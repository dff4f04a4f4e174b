#![no_main]

use libfuzzer_sys::fuzz_target;

use std::net::IpAddr;
use transcript_assets::assets::pinning::{default_metadata_ranges, is_unsafe_ip, pin_url, IpRange};
use url::Url;

fuzz_target!(|data: &str| {
    // Classification and pinning must never panic, whatever the input.
    let ranges = default_metadata_ranges();

    if let Ok(ip) = data.parse::<IpAddr>() {
        let _ = is_unsafe_ip(&ip, &ranges);
    }
    let _ = data.parse::<IpRange>();

    if let Ok(url) = Url::parse(data) {
        for ip in ["93.184.216.34", "2606:2800:220:1::1"] {
            let ip: IpAddr = ip.parse().unwrap();
            if let Ok(pinned) = pin_url(&url, ip) {
                // A pinned URL keeps everything but the host.
                assert_eq!(pinned.path(), url.path());
                assert_eq!(pinned.query(), url.query());
                assert_eq!(pinned.port_or_known_default(), url.port_or_known_default());
            }
        }
    }
});
