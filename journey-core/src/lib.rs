//! Journey Core - Entity Types
//!
//! Identifiers, state enums, persisted entities, the error taxonomy,
//! configuration, the playbook model and the contracts of the external
//! capabilities. Every other journey crate depends on this one.

mod capabilities;
mod config;
mod entities;
mod enums;
mod error;
mod identity;
mod playbook;

pub use capabilities::*;
pub use config::*;
pub use entities::*;
pub use enums::*;
pub use error::*;
pub use identity::*;
pub use playbook::*;

/// Node whose form is projected onto the user's profile columns.
pub const PROFILE_NODE_ID: &str = "S1_profile";

/// Node holding the publications list form.
pub const PUBLICATIONS_NODE_ID: &str = "S1_publications_list";

/// World whose nodes score zero on the scoreboard.
pub const ZERO_SCORE_WORLD_ID: &str = "W3";

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
