//! Domain types shared by the pipeline and the handlers.

pub mod movie;
pub mod permission;
pub mod token;
pub mod user;
pub mod validator;

pub use movie::{Movie, MoviePatch, NewMovie, Runtime};
pub use permission::Permissions;
pub use token::{Fingerprint, Scope, Token, TokenRecord};
pub use user::{Principal, User, UserCredentials};
pub use validator::Validator;
