//! Fuzz target for decoding stored replication job documents.
//!
//! Whatever the store hands back, decoding must not panic, and anything that
//! decodes must survive an encode/decode cycle unchanged.

#![no_main]

use couch_mesh::document::ReplicationDocument;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    if let Some(doc) = ReplicationDocument::from_value(&value) {
        let encoded = doc.to_value().expect("decoded document encodes");
        assert_eq!(ReplicationDocument::from_value(&encoded), Some(doc));
    }
});
