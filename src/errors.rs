use thiserror::Error;

/// Error types for platform operations
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Invalid session")]
    InvalidSession,

    #[error("Session ID mismatch")]
    SessionMismatch,

    // Expired challenges are purged on read, so an expired challenge
    // surfaces as not-found.
    #[error("Challenge not found: {0}")]
    ChallengeNotFound(String),

    #[error("Credential verification failed: {0}")]
    VerificationFailed(String),

    #[error("Username already exists: {0}")]
    UserExists(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Model error: {0}")]
    Model(String),
}
