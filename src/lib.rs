#![doc = include_str!("../README.md")]

pub mod error;
pub mod proxy;
pub mod seal;
pub mod token;
pub mod types;

// Re-exports for convenient access
pub use error::Error;
pub use seal::{MIN_PASSWORD_LEN, SessionCodec};
pub use token::{
    ACCESS_TOKEN_FIELDS, JwtPayloadDeriver, REFRESH_TOKEN_FIELDS, TokenDeriver,
    access_token_from_body, decode_jwt_payload,
};
pub use types::{SealedSession, TokenBundle};
