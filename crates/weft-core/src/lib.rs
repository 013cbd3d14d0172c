//! Value types and the dependency registry for the weft metadata engine.
//!
//! # Modules
//!
//! - [`id`]: identifiers, entity references, markers
//! - [`fragment`]: generated fragments and explicit declarations
//! - [`item`]: metadata items and their lifecycle states
//! - [`graph`]: the dependency registry
//! - [`error`]: CoreError

pub mod error;
pub mod fragment;
pub mod graph;
pub mod id;
pub mod item;

// Re-export commonly used types
pub use error::CoreError;
pub use fragment::{
    method_signature, Declaration, FieldDecl, Fragment, FragmentKind, MethodDecl, Modifiers,
};
pub use graph::{DependencyGraph, EdgeKind};
pub use id::{EntityRef, Identifier, LocationTag, Marker, MarkerSet, ProviderKind};
pub use item::{ItemDraft, ItemState, MetadataItem};
