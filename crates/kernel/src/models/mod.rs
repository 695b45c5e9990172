//! Identity models consumed from the identity/RBAC provider.

pub mod role;
pub mod user;

pub use role::{Permission, Role};
pub use user::UserContext;
