use thiserror::Error;

/// Why a snapshot or delta was not applied. The reconciler always keeps its
/// previous state when it returns one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("unknown delta type `{0}`")]
    UnknownDelta(String),
    #[error("unknown live event `{0}`")]
    UnknownEvent(String),
    #[error("country `{0}` already exists")]
    DuplicateCountry(String),
    #[error("war references unknown country `{0}`")]
    UnknownCountry(String),
    #[error("country `{0}` cannot be at war with itself")]
    SelfWar(String),
    #[error("no state has been loaded yet")]
    NotSeeded,
}

impl ReconcileError {
    /// Forward-compatibility cases: newer producers may send tags this client
    /// does not know. These are logged, not surfaced to the user.
    pub const fn is_ignorable(&self) -> bool {
        matches!(self, Self::UnknownDelta(_) | Self::UnknownEvent(_))
    }

    pub(crate) fn malformed(context: &str, err: impl std::fmt::Display) -> Self {
        Self::MalformedPayload(format!("{context}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::ReconcileError;

    #[test]
    fn only_unknown_tags_are_ignorable() {
        assert!(ReconcileError::UnknownDelta("x".into()).is_ignorable());
        assert!(ReconcileError::UnknownEvent("x".into()).is_ignorable());
        assert!(!ReconcileError::MalformedPayload("x".into()).is_ignorable());
        assert!(!ReconcileError::NotSeeded.is_ignorable());
    }

    #[test]
    fn messages_name_the_offending_key() {
        assert_eq!(
            ReconcileError::DuplicateCountry("Avalon".into()).to_string(),
            "country `Avalon` already exists"
        );
        assert_eq!(
            ReconcileError::malformed("player_move", "missing field `player`").to_string(),
            "malformed payload: player_move: missing field `player`"
        );
    }
}
