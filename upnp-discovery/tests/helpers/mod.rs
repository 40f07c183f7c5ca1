//! Shared fixtures for description tests

use std::fs;
use std::path::PathBuf;

/// Read a description document from `tests/fixtures`.
pub fn load_fixture(filename: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/fixtures");
    path.push(filename);

    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", filename, e))
}

/// A search response pointing at `location`.
pub fn search_response(location: &str, st: &str, uuid: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age = 1800\r\n\
         EXT:\r\n\
         LOCATION: {}\r\n\
         SERVER: Linux/5.10 UPnP/1.0 Acme/2.1\r\n\
         ST: {}\r\n\
         USN: uuid:{}::{}\r\n\
         \r\n",
        location, st, uuid, st
    )
}
