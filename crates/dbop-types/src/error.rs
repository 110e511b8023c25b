//! Member model error types
//!
//! These are internal-consistency violations. A deployment whose model
//! produces one of these must not be mutated until it is corrected.

use crate::{MemberId, MemberPhase, ServerGroup};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("member {0} is listed more than once")]
    DuplicateMember(MemberId),

    #[error("member {member} is listed under group {group} but its identity belongs to another group")]
    MemberInWrongGroup { member: MemberId, group: ServerGroup },

    #[error("member not found: {0}")]
    MemberNotFound(MemberId),

    #[error("member {member} cannot move from phase {from} back to {to}")]
    PhaseRegression {
        member: MemberId,
        from: MemberPhase,
        to: MemberPhase,
    },

    #[error("invalid spec: {0}")]
    InvalidSpec(String),
}

/// Result type for member model operations
pub type ModelResult<T> = std::result::Result<T, ModelError>;
