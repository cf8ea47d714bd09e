//! SeaORM entities backing the credential store.

pub mod refresh_token;
pub mod user;
