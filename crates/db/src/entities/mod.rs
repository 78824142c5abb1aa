//! Database entities.

#![allow(missing_docs)]

pub mod campaign;
pub mod contact;
pub mod message;
pub mod template;

pub use campaign::Entity as Campaign;
pub use contact::Entity as Contact;
pub use message::Entity as Message;
pub use template::Entity as Template;
