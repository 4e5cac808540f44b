//! Journey Engine
//!
//! Advances users through a playbook's node graph: requirement slots,
//! the role-gated state machine, successor activation, form submission,
//! presigned uploads and the tenant scoreboard. [`JourneyService`] is the
//! entry point; the components are public for hosts that need finer control.

pub mod activation;
pub mod coordinator;
pub mod notify;
pub mod publications;
pub mod scoreboard;
pub mod service;
pub mod slots;
pub mod strategies;
pub mod telemetry;
pub mod transition;
pub mod uploads;

pub use activation::{Activation, ActivationEngine};
pub use coordinator::{FormView, SubmissionCoordinator, SubmissionRequest, SubmissionView};
pub use notify::{NotificationDispatcher, NotificationSnapshot, StateChangeNotice};
pub use publications::{PublicationEntry, PublicationSections, PublicationsForm};
pub use scoreboard::{ScoreEntry, Scoreboard};
pub use service::{parse_requested_state, JourneyService, JourneyServiceBuilder};
pub use slots::SlotEngine;
pub use strategies::{
    NodeStrategy, ProfileSyncStrategy, PublicationsStrategy, StrategyRegistry, SubmitContext,
};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use transition::{StateMachine, STUDENT_ROLE};
pub use uploads::{AttachRequest, PresignedUpload, UploadService};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
