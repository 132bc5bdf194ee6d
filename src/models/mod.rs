//! Data types shared with external collaborators

/// Request and response types of the remote search service.
pub mod search;
