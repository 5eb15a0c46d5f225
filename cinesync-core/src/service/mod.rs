pub mod auth;
pub mod publish_key;

pub use auth::{BearerClaims, TokenService, DEFAULT_TOKEN_TTL_HOURS};
pub use publish_key::{PublishKeyService, RtmpClaims, PUBLISH_KEY_TTL_HOURS};
