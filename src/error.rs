use crate::types::EntityType;
use thiserror::Error;

/// An entity record could not be turned into a usable state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("{entity_type:?} record is missing its {field}")]
    MissingIdentity {
        entity_type: EntityType,
        field: &'static str,
    },
    #[error("profile store unavailable for {entity_id}: {reason}")]
    ProfileUnavailable { entity_id: String, reason: String },
    #[error("none of the {attempted} candidate entities could be converted")]
    NoSurvivors { attempted: usize },
    #[error("only {survived} group members could be converted, {required} required")]
    TooFewMembers { survived: usize, required: usize },
}

impl ConversionError {
    /// Short label that never carries an entity id.
    pub fn label(&self) -> &'static str {
        match self {
            ConversionError::MissingIdentity { .. } => "missing_identity",
            ConversionError::ProfileUnavailable { .. } => "profile_unavailable",
            ConversionError::NoSurvivors { .. } => "no_survivors",
            ConversionError::TooFewMembers { .. } => "too_few_members",
        }
    }
}

/// Direct or chunked projection was not well-defined; the projector falls back
/// to pairwise similarity when it sees one of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    #[error("joint vector ({joint}) is shorter than the user vector ({user})")]
    Shorter { joint: usize, user: usize },
    #[error("projection produced a non-finite value")]
    NonFinite,
    #[error("user vector is empty")]
    Empty,
}

#[derive(Debug, Error)]
pub enum MatchingError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("offline and no cached entity states can satisfy the request")]
    OfflineUnavailable,
    #[error("scoring failed: {0}")]
    Computation(String),
}

/// Coarse classification used by callers to pick what to show the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    Offline,
    Other,
}

impl MatchingError {
    pub fn kind(&self) -> FailureKind {
        match self {
            MatchingError::Validation(_) => FailureKind::Validation,
            MatchingError::OfflineUnavailable => FailureKind::Offline,
            MatchingError::Conversion(_) | MatchingError::Computation(_) => FailureKind::Other,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            FailureKind::Validation => "The request could not be matched as submitted. Please check it and try again.",
            FailureKind::Offline => "Connect to the internet to get fresh matches.",
            FailureKind::Other => "Matching failed.",
        }
    }

    /// Stable short label used in audit events and logs.
    pub fn label(&self) -> &'static str {
        match self {
            MatchingError::Validation(_) => "validation",
            MatchingError::Conversion(_) => "conversion",
            MatchingError::OfflineUnavailable => "offline_unavailable",
            MatchingError::Computation(_) => "computation",
        }
    }
}
