//! Session handling: token ownership, auth endpoints, route guarding.

pub mod api;
pub mod guard;
pub mod manager;
pub mod store;
pub mod token;

pub use api::{AuthApi, AuthApiError, Credentials, HttpAuthApi, TokenResponse};
pub use guard::{AriaLive, GuardEffect, GuardPhase, GuardView, RouteGuard};
pub use manager::{
    AuthError, RefreshError, RefreshPolicy, SessionSnapshot, TokenManager, TokenManagerBuilder,
};
pub use store::{AuthState, AuthStore};
pub use token::{Claims, TokenError, TokenValidation, decode_claims};
