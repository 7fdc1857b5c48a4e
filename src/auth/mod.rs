//! Credentials and route guards.
//!
//! Token issuance and validation, the `AuthGate` middleware, password hashing
//! and the account flows (register, login, refresh, profile, roles).

pub mod codes;
pub mod handlers;
pub mod middleware;
pub mod password;
pub mod service;
pub mod token;
pub mod validation;

pub use middleware::{AuthGate, Principal};
pub use service::{AuthResponse, AuthService, RegisterRequest};
pub use token::{Claims, TokenPair, TokenService, TokenType};
