//! Fuzz target for input validation and address normalization.
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```
//!
//! Checked properties:
//!
//! - No validator panics on any input
//! - `normalize_ip` is idempotent
//! - Every accepted allow-list entry is already in normalized form
//! - An accepted date range is non-empty

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use plant_telemetry::middleware::ip::strip_port;
use plant_telemetry::validation::{
    normalize_ip, parse_date_range, validate_interval, validate_ip_allow_list, validate_plant_name,
};

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    text: &'a str,
    other: &'a str,
    interval: i64,
    entries: Vec<String>,
}

fuzz_target!(|input: Input<'_>| {
    if let Some(ip) = normalize_ip(input.text) {
        assert_eq!(normalize_ip(&ip).as_deref(), Some(ip.as_str()));
    }

    let _ = normalize_ip(strip_port(input.text));

    if let Ok(name) = validate_plant_name(input.text) {
        assert_eq!(name.trim(), name);
        assert!(!name.is_empty());
    }

    if let Ok(interval) = validate_interval(input.interval) {
        assert!(interval >= 1);
    }

    if let Ok(list) = validate_ip_allow_list(&input.entries) {
        for entry in &list {
            assert_eq!(normalize_ip(entry).as_deref(), Some(entry.as_str()));
        }
    }

    if let Ok((start, end)) = parse_date_range(input.text, input.other) {
        assert!(start < end);
    }
});
