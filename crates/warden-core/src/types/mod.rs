//! Core types for Warden

mod principal;
mod schema;

pub use principal::*;
pub use schema::*;
