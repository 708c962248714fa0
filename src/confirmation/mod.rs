pub mod repository;
pub mod service;
pub mod sweeper;
pub mod types;

pub use repository::{
    ConfirmationRepository, FallbackRepository, FlowPatch, InMemoryConfirmationStore,
    SqliteConfirmationStore, TransitionOutcome,
};
pub use service::{ConfirmationResponse, ConfirmationService, CreateConfirmationRequest};
pub use sweeper::ExpirationSweeper;
pub use types::{
    ActionPreview, ConfirmationFlow, ConfirmationStats, ConfirmationStatus, RiskAssessment,
    RiskLevel,
};
