//! Journey Storage - Persistence Contract and In-Memory Store
//!
//! Defines the async storage abstraction the journey engine runs against.
//! A SQL-backed implementation lives with the hosting service.

mod memory;
mod store;

pub use memory::InMemoryJourneyStore;
pub use store::{CasOutcome, JourneyStore};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
