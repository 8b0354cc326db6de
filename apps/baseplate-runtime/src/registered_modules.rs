//! Link-time module manifest.
//!
//! Every module crate the embedding binary wants hosted is named here so its
//! `inventory::submit!` registration runs before `main`. Concrete modules
//! (comms, operations, sensors, data_store, ...) are out of scope for this
//! core; this file is the seam where an embedder lists its own module
//! crates, e.g. `use acme_comms_module as _;`.
