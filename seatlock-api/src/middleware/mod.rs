pub mod auth;

pub use auth::{user_auth_middleware, AuthenticatedUser, Claims};
