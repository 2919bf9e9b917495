//! Fuzz target for replication edge identifiers.
//!
//! Ids must be stable, 40 hex characters, and distinguish direction.

#![no_main]

use couch_mesh::document::document_id;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, &str)| {
    let (source, target) = data;

    let id = document_id(source, target);
    assert_eq!(id.len(), 40);
    assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    assert_eq!(id, document_id(source, target));

    if source != target && !source.contains(',') && !target.contains(',') {
        assert_ne!(id, document_id(target, source));
    }
});
