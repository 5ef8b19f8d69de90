//! chatgate - OpenID Connect gatekeeper for a chat webhook
//!
//! Signs users in against an external identity provider (authorization code
//! flow with PKCE), authorizes them by group membership, keeps server-side
//! sessions and relays authenticated chat requests to a downstream webhook.

pub mod authz;
pub mod config;
pub mod error;
pub mod middleware;
pub mod oidc;
pub mod proxy;
pub mod routes;
pub mod server;
pub mod session;
pub mod state;
pub mod templates;

pub use config::AppConfig;
pub use routes::create_router;
pub use state::AppState;
