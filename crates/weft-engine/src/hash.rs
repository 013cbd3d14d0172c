//! Deterministic content fingerprints for metadata items using blake3.
//!
//! A fingerprint covers an item's public output only: its fragments (in
//! emission order) and its payload. Upstream dependencies are excluded, so an
//! item that reads different inputs but produces the same output is
//! considered unchanged and its consumers are not recomputed.
//!
//! # Determinism
//!
//! - Fragment fields are length-prefixed so adjacent strings cannot alias.
//! - Payloads are serialized with `serde_json`, whose object maps are
//!   ordered, so equal values always produce equal bytes.

use weft_core::{Fragment, FragmentKind, MetadataItem};

/// Fingerprint of an item's public output.
pub type Fingerprint = blake3::Hash;

fn kind_byte(kind: FragmentKind) -> u8 {
    match kind {
        FragmentKind::Field => 0,
        FragmentKind::Method => 1,
        FragmentKind::TypeAnnotation => 2,
    }
}

fn update_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

/// Hashes one fragment into `hasher`.
pub fn hash_fragment(hasher: &mut blake3::Hasher, fragment: &Fragment) {
    hasher.update(&[kind_byte(fragment.kind)]);
    update_str(hasher, &fragment.signature);
    update_str(hasher, &fragment.source.to_string());
    update_str(hasher, &fragment.body);
}

/// Computes the fingerprint of an item's fragments and payload.
pub fn item_fingerprint(item: &MetadataItem) -> Result<Fingerprint, serde_json::Error> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(item.fragments.len() as u64).to_le_bytes());
    for fragment in &item.fragments {
        hash_fragment(&mut hasher, fragment);
    }
    serde_json::to_writer(&mut hasher, &item.payload)?;
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;
    use weft_core::{Identifier, ItemDraft};

    use super::*;

    fn id() -> Identifier {
        "MID:JavaBean#SRC_MAIN?com.example.Person".parse().unwrap()
    }

    fn item(methods: &[&str], payload: serde_json::Value, upstream: BTreeSet<Identifier>) -> MetadataItem {
        let id = id();
        let mut draft = ItemDraft::new(&id).with_payload(payload);
        for m in methods {
            draft.method(*m, "");
        }
        MetadataItem::commit(&id, draft, upstream).unwrap()
    }

    #[test]
    fn equal_output_equal_fingerprint() {
        let a = item(&["getName()"], json!({"a": 1, "b": 2}), BTreeSet::new());
        let b = item(&["getName()"], json!({"b": 2, "a": 1}), BTreeSet::new());
        assert_eq!(item_fingerprint(&a).unwrap(), item_fingerprint(&b).unwrap());
    }

    #[test]
    fn upstream_does_not_affect_fingerprint() {
        let upstream: BTreeSet<Identifier> = [id().declaration_of()].into_iter().collect();
        let a = item(&["getName()"], json!(null), BTreeSet::new());
        let b = item(&["getName()"], json!(null), upstream);
        assert_eq!(item_fingerprint(&a).unwrap(), item_fingerprint(&b).unwrap());
    }

    #[test]
    fn fragment_order_and_payload_matter() {
        let a = item(&["getA()", "getB()"], json!(null), BTreeSet::new());
        let b = item(&["getB()", "getA()"], json!(null), BTreeSet::new());
        let c = item(&["getA()", "getB()"], json!(1), BTreeSet::new());
        let fa = item_fingerprint(&a).unwrap();
        assert_ne!(fa, item_fingerprint(&b).unwrap());
        assert_ne!(fa, item_fingerprint(&c).unwrap());
    }

    #[test]
    fn length_prefix_prevents_aliasing() {
        let a = item(&["ab", "c"], json!(null), BTreeSet::new());
        let b = item(&["a", "bc"], json!(null), BTreeSet::new());
        assert_ne!(item_fingerprint(&a).unwrap(), item_fingerprint(&b).unwrap());
    }
}
