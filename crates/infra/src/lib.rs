//! Infrastructure layer: ports, adapters, config and the enrollment orchestrator.

pub mod config;
pub mod directory;
pub mod external;
pub mod lms;
pub mod messaging;
pub mod orchestrator;
pub mod payments;
pub mod store;
