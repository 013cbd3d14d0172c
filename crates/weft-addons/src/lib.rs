//! Reference metadata providers for weft.
//!
//! Each provider is triggered by one [`Marker`](weft_core::Marker) and
//! contributes generated members to the marked entity:
//!
//! - [`JavaBeanProvider`]: accessors and mutators
//! - [`EntityProvider`]: persistence identity (`@Entity`, identifier and
//!   version fields)
//! - [`EqualsProvider`]: `equals(Object)` and `hashCode()`
//! - [`ToStringProvider`]: `toString()`
//! - [`ServiceProvider`]: CRUD operations for the entity a service names
//! - [`ControllerProvider`]: web request handlers over a form backing entity
//!
//! [`install_defaults`] registers all of them in a fixed order, which is also
//! their precedence when fragments collide.

pub mod controller;
pub mod entity;
pub mod equals;
pub mod javabean;
pub mod members;
pub mod service;
pub mod tostring;

use std::sync::Arc;

use weft_engine::{EngineError, ProviderRegistry};

pub use controller::{ControllerPayload, ControllerProvider};
pub use entity::{EntityPayload, EntityProvider};
pub use equals::{EqualsPayload, EqualsProvider};
pub use javabean::{JavaBeanPayload, JavaBeanProvider};
pub use service::{ServicePayload, ServiceProvider};
pub use tostring::{ToStringPayload, ToStringProvider};

/// Registers every provider of this crate: JavaBean, Entity, Equals,
/// ToString, Service, Controller.
pub fn install_defaults(registry: &mut ProviderRegistry) -> Result<(), EngineError> {
    registry.register(Arc::new(JavaBeanProvider), JavaBeanProvider::triggers())?;
    registry.register(Arc::new(EntityProvider), EntityProvider::triggers())?;
    registry.register(Arc::new(EqualsProvider), EqualsProvider::triggers())?;
    registry.register(Arc::new(ToStringProvider), ToStringProvider::triggers())?;
    registry.register(Arc::new(ServiceProvider), ServiceProvider::triggers())?;
    registry.register(Arc::new(ControllerProvider), ControllerProvider::triggers())?;
    Ok(())
}
