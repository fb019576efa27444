pub mod document;
pub mod identity;
pub mod request;

pub use document::DocumentSource;
pub use identity::{BoundIdentity, IdentityClaim};
pub use request::RequestHeaders;

/// Version tag carried by every persisted record
pub const SCHEMA_VERSION: u16 = 1;
