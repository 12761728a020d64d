//! Local registry of tracked subjects and their refreshable data.

mod base;
pub mod memory;

pub use base::SubjectRepository;
