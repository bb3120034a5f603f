//! Handshake credential verification
//!
//! Tokens are checked against the backend user-info endpoint through a
//! circuit breaker; a development-only sentinel token skips the backend.

pub mod gateway;
pub mod identity_client;

pub use gateway::{AuthError, AuthGateway, VerifiedIdentity, DEV_BYPASS_TOKEN};
pub use identity_client::{
    HttpIdentityProvider, IdentityError, IdentityProvider, UserData, UserInfoOutcome,
};
