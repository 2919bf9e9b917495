//! Fuzz target for server URL parsing.
//!
//! Parsing arbitrary input never panics, and an accepted endpoint re-parses
//! to itself and can always carry a replication source.

#![no_main]

use couch_mesh::config::{Credential, ServerEndpoint};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, &str)| {
    let (raw, database) = data;

    let Ok(endpoint) = ServerEndpoint::parse(raw) else {
        return;
    };
    let again = ServerEndpoint::parse(endpoint.as_str()).expect("normalized URL re-parses");
    assert_eq!(again, endpoint);

    if !database.is_empty() {
        let _ = endpoint.replication_source(database, &Credential::new("repl", "pw"));
    }
});
