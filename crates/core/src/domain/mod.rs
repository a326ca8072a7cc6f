pub mod advisor;
pub mod lead;
pub mod rotation;
