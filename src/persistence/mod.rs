//! Backend persistence for finished recordings.

pub mod gateway;

pub use gateway::{AccessTokenProvider, HttpPersistenceGateway, PersistenceGateway};
