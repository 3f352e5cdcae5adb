use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("That channel is already linked!")]
    AlreadyLinked,
    #[error("Invalid invite code!")]
    InvalidInvite,
    #[error("That link has disappeared!")]
    LinkGone,
    #[error("That channel is not linked!")]
    NotLinked,
    #[error("{0}")]
    NotAuthorized(&'static str),
    #[error("I couldn't find information on this message.")]
    ResolveMiss,
    #[error("dispatch to channel {channel_id} failed: {source}")]
    DispatchFailed {
        channel_id: u64,
        #[source]
        source: anyhow::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("platform error: {0}")]
    Platform(#[from] anyhow::Error),
}

impl RelayError {
    /// Validation failures that are reported back to the invoker verbatim.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            RelayError::AlreadyLinked
                | RelayError::InvalidInvite
                | RelayError::LinkGone
                | RelayError::NotLinked
                | RelayError::NotAuthorized(_)
                | RelayError::ResolveMiss
        )
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
