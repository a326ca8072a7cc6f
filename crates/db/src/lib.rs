pub mod assigner;
pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use assigner::{
    AssignPendingReport, AssignmentError, AssignmentOutcome, AssignmentSettings, Assigner,
    IntakeResult, LeadAssignment,
};
pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use fixtures::{DemoDataset, SeedResult, VerificationResult};
