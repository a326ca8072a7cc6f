pub mod config;
pub mod domain;
pub mod errors;
pub mod round_robin;

pub use domain::advisor::{Advisor, AdvisorId, NewAdvisor};
pub use domain::lead::{Lead, LeadId, LeadStatus, NewLead};
pub use domain::rotation::RotationState;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use round_robin::{ActiveRoster, Confirmation, RotationDecision, RoundRobinPolicy};
