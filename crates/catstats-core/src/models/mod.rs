//! Shared data models for the query layers

mod entity;
mod store;

pub use entity::*;
pub use store::*;
