//! Weaving: assembling a governor's externally visible member set from the
//! fragments of all its valid metadata items.
//!
//! Fragments are taken in a fixed order: the entity's explicit declaration
//! first, then each generated item in provider registration order, then in
//! the order each provider emitted them. The first fragment with a given
//! `(kind, signature)` wins. A generated fragment that loses to the explicit
//! declaration is dropped silently; one that loses to another generated
//! fragment is reported as a [`FragmentCollision`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use weft_core::{EntityRef, Fragment, FragmentKind, Identifier, MetadataItem, ProviderKind};

/// Two generated fragments with the same kind and signature. Non-fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentCollision {
    pub kind: FragmentKind,
    pub signature: String,
    /// Item whose fragment is in the view.
    pub kept: Identifier,
    /// Item whose fragment was dropped.
    pub dropped: Identifier,
}

/// The merged member set of one governor entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernorView {
    pub entity: EntityRef,
    pub fragments: Vec<Fragment>,
    pub collisions: Vec<FragmentCollision>,
}

impl GovernorView {
    /// Merges `items`, all targeting `entity`. `precedence` gives each
    /// generated item's provider rank (lower wins); kinds without a rank sort
    /// last.
    pub fn from_items<F>(entity: &EntityRef, items: &[Arc<MetadataItem>], precedence: F) -> Self
    where
        F: Fn(&ProviderKind) -> Option<u64>,
    {
        let mut ordered: Vec<(u8, u64, &MetadataItem)> = items
            .iter()
            .filter(|item| item.id.entity() == entity)
            .map(|item| {
                if item.id.is_declaration() {
                    (0, 0, item.as_ref())
                } else {
                    let rank = precedence(item.id.kind()).unwrap_or(u64::MAX);
                    (1, rank, item.as_ref())
                }
            })
            .collect();
        ordered.sort_by(|a, b| (a.0, a.1, &a.2.id).cmp(&(b.0, b.1, &b.2.id)));

        let mut fragments: Vec<Fragment> = Vec::new();
        let mut collisions = Vec::new();
        // key -> (index into fragments, came from the declaration)
        let mut taken: HashMap<(FragmentKind, String), (usize, bool)> = HashMap::new();

        for (group, _, item) in ordered {
            let explicit = group == 0;
            for fragment in &item.fragments {
                let key = (fragment.kind, fragment.signature.clone());
                match taken.get(&key) {
                    None => {
                        taken.insert(key, (fragments.len(), explicit));
                        fragments.push(fragment.clone());
                    }
                    Some(&(_, true)) => {
                        tracing::trace!(
                            entity = %entity,
                            signature = %fragment.signature,
                            source = %fragment.source,
                            "generated fragment shadowed by declaration"
                        );
                    }
                    Some(&(idx, false)) => {
                        if explicit {
                            continue;
                        }
                        let collision = FragmentCollision {
                            kind: fragment.kind,
                            signature: fragment.signature.clone(),
                            kept: fragments[idx].source.clone(),
                            dropped: fragment.source.clone(),
                        };
                        tracing::warn!(
                            entity = %entity,
                            signature = %collision.signature,
                            kept = %collision.kept,
                            dropped = %collision.dropped,
                            "fragment collision"
                        );
                        collisions.push(collision);
                    }
                }
            }
        }

        GovernorView {
            entity: entity.clone(),
            fragments,
            collisions,
        }
    }

    pub fn find(&self, kind: FragmentKind, signature: &str) -> Option<&Fragment> {
        self.fragments
            .iter()
            .find(|f| f.kind == kind && f.signature == signature)
    }

    pub fn members(&self, kind: FragmentKind) -> impl Iterator<Item = &Fragment> + '_ {
        self.fragments.iter().filter(move |f| f.kind == kind)
    }

    /// Method signatures in view order.
    pub fn method_signatures(&self) -> Vec<&str> {
        self.members(FragmentKind::Method)
            .map(|f| f.signature.as_str())
            .collect()
    }
}
