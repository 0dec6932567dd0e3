//! Data Transfer Objects
//!
//! Request shapes shared between the HTTP layer and the services.

pub mod build;
pub mod proc;
