//! Identity newtypes for metadata items.
//!
//! An [`Identifier`] names at most one metadata item: the provider kind that
//! produces it, the entity it targets, and a logical location tag. All three
//! parts are reference counted strings, so identifiers clone cheaply and can
//! be handed around by value without copying entity data.
//!
//! Identifiers are totally ordered (kind, then entity, then location) so that
//! every collection keyed by them iterates deterministically.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Prefix of the canonical textual form of an [`Identifier`].
pub const IDENTIFIER_PREFIX: &str = "MID:";

/// Reference to a declared type. Owned by the declaration source; weft only
/// ever holds it by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRef(Arc<str>);

/// Name of the provider kind that owns an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderKind(Arc<str>);

/// Logical location of an entity (source root, module, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationTag(Arc<str>);

impl EntityRef {
    pub fn new(name: impl AsRef<str>) -> Self {
        EntityRef(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The unqualified type name (`com.example.Person` -> `Person`).
    pub fn simple_name(&self) -> &str {
        match self.0.rsplit_once('.') {
            Some((_, simple)) => simple,
            None => &self.0,
        }
    }
}

impl ProviderKind {
    /// Kind of the items that hold an entity's own declaration.
    pub const DECLARATION: &'static str = "PhysicalType";

    pub fn new(name: impl AsRef<str>) -> Self {
        ProviderKind(Arc::from(name.as_ref()))
    }

    pub fn declaration() -> Self {
        ProviderKind::new(Self::DECLARATION)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_declaration(&self) -> bool {
        &*self.0 == Self::DECLARATION
    }
}

impl LocationTag {
    pub const DEFAULT: &'static str = "SRC_MAIN";

    pub fn new(tag: impl AsRef<str>) -> Self {
        LocationTag(Arc::from(tag.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LocationTag {
    fn default() -> Self {
        LocationTag::new(Self::DEFAULT)
    }
}

impl From<&str> for EntityRef {
    fn from(name: &str) -> Self {
        EntityRef::new(name)
    }
}

impl From<&str> for ProviderKind {
    fn from(name: &str) -> Self {
        ProviderKind::new(name)
    }
}

impl From<&str> for LocationTag {
    fn from(tag: &str) -> Self {
        LocationTag::new(tag)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for LocationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structured key naming one metadata item.
///
/// The canonical textual form is `MID:<kind>#<location>?<entity>`, e.g.
/// `MID:JavaBean#SRC_MAIN?com.example.Person`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    kind: ProviderKind,
    entity: EntityRef,
    location: LocationTag,
}

impl Identifier {
    pub fn new(kind: ProviderKind, entity: EntityRef, location: LocationTag) -> Self {
        Identifier {
            kind,
            entity,
            location,
        }
    }

    /// Identifier of the item holding `entity`'s own declaration.
    pub fn declaration(entity: EntityRef, location: LocationTag) -> Self {
        Identifier::new(ProviderKind::declaration(), entity, location)
    }

    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    pub fn location(&self) -> &LocationTag {
        &self.location
    }

    pub fn is_declaration(&self) -> bool {
        self.kind.is_declaration()
    }

    /// Same entity and location, different provider kind.
    pub fn sibling(&self, kind: ProviderKind) -> Identifier {
        Identifier::new(kind, self.entity.clone(), self.location.clone())
    }

    /// The declaration identifier of this identifier's entity.
    pub fn declaration_of(&self) -> Identifier {
        self.sibling(ProviderKind::declaration())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}#{}?{}",
            IDENTIFIER_PREFIX, self.kind, self.location, self.entity
        )
    }
}

impl FromStr for Identifier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| CoreError::MalformedIdentifier {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let rest = s
            .strip_prefix(IDENTIFIER_PREFIX)
            .ok_or_else(|| malformed("missing 'MID:' prefix"))?;
        let (kind, rest) = rest
            .split_once('#')
            .ok_or_else(|| malformed("missing '#' before location"))?;
        let (location, entity) = rest
            .split_once('?')
            .ok_or_else(|| malformed("missing '?' before entity"))?;

        if kind.is_empty() {
            return Err(malformed("empty provider kind"));
        }
        if location.is_empty() {
            return Err(malformed("empty location"));
        }
        if entity.is_empty() {
            return Err(malformed("empty entity"));
        }

        Ok(Identifier::new(
            ProviderKind::new(kind),
            EntityRef::new(entity),
            LocationTag::new(location),
        ))
    }
}

/// Markers a declaration can carry. Providers are triggered by these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Marker {
    JavaBean,
    Entity,
    Equals,
    ToString,
    Service,
    Controller,
}

impl Marker {
    pub const ALL: [Marker; 6] = [
        Marker::JavaBean,
        Marker::Entity,
        Marker::Equals,
        Marker::ToString,
        Marker::Service,
        Marker::Controller,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Marker::JavaBean => "JavaBean",
            Marker::Entity => "Entity",
            Marker::Equals => "Equals",
            Marker::ToString => "ToString",
            Marker::Service => "Service",
            Marker::Controller => "Controller",
        }
    }

    /// Looks up a marker by name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Marker> {
        Marker::ALL.into_iter().find(|m| m.name() == name)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An ordered set of markers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerSet(BTreeSet<Marker>);

impl MarkerSet {
    pub fn new() -> Self {
        MarkerSet(BTreeSet::new())
    }

    /// Builds a set from marker names, silently dropping names that do not
    /// belong to the marker domain.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        names.into_iter().filter_map(Marker::from_name).collect()
    }

    pub fn insert(&mut self, marker: Marker) -> bool {
        self.0.insert(marker)
    }

    pub fn contains(&self, marker: Marker) -> bool {
        self.0.contains(&marker)
    }

    pub fn intersects(&self, other: &MarkerSet) -> bool {
        self.0.iter().any(|m| other.0.contains(m))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Marker> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Marker> for MarkerSet {
    fn from_iter<I: IntoIterator<Item = Marker>>(iter: I) -> Self {
        MarkerSet(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Marker; N]> for MarkerSet {
    fn from(markers: [Marker; N]) -> Self {
        markers.into_iter().collect()
    }
}
