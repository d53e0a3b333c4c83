//! Shared wiring between the `silo` CLI and integration tests.

pub mod initialization;
