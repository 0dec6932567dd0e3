//! Perch Core
//!
//! Core types and pure logic for the Perch build server.
//!
//! This crate contains:
//! - Domain types: builds, procs, repositories and the events announced about them
//! - Lifecycle: status transitions for builds and procs, free of any I/O
//! - DTOs: request shapes shared by the server's HTTP layer

pub mod domain;
pub mod dto;
pub mod lifecycle;
