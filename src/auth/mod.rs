//! Authentication: password hashing, bearer tokens, rate limiting, extractors.

pub mod extract;
pub mod model;
pub mod password;
pub mod rate_limit;
pub mod routes;
pub mod token;

pub use extract::{AuthUser, ClientIp};
pub use model::User;
pub use rate_limit::RateLimiter;
pub use routes::auth_routes;
pub use token::TokenIssuer;
