//! core
//!
//! Domain types for the receive pipeline: validated identifiers,
//! the ticket/patchset/change model, the bit-exact ref-name
//! conventions, and the settings schema.

pub mod refspec;
pub mod settings;
pub mod ticket;
pub mod types;
