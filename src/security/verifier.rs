// Credential verification collaborator. The platform only ever talks to
// the trait; the cryptographic protocol behind it is interchangeable.
// `HmacVerifier` is the built-in development implementation: possession of
// a per-credential secret, proven by an HMAC over the issued challenge.

use async_trait::async_trait;
use rand::{thread_rng, Rng};
use ring::hmac;

use crate::errors::PlatformError;
use crate::models::StoredCredential;

/// Verification strictness. Step-up re-authentication always uses
/// `Strict`, which additionally demands user verification on the
/// authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationMode {
    Standard,
    Strict,
}

/// Client response enrolling a new credential.
#[derive(Debug, Clone)]
pub struct RegistrationAttestation {
    pub credential_id: String,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Client response to an authentication or step-up challenge.
#[derive(Debug, Clone)]
pub struct CredentialAssertion {
    pub credential_id: String,
    pub signature: Vec<u8>,
    /// Authenticator replay counter; must advance past the stored value.
    pub sign_count: u32,
    pub user_verified: bool,
}

/// Successful verification outcome: the replay counter to persist.
#[derive(Debug, Clone)]
pub struct VerifiedAssertion {
    pub credential_id: String,
    pub new_sign_count: u32,
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Fresh random challenge bytes for any phase of the protocol.
    fn generate_challenge(&self) -> Vec<u8>;

    /// Validate an enrollment response against the issued challenge.
    async fn verify_registration(
        &self,
        challenge: &[u8],
        attestation: &RegistrationAttestation,
    ) -> Result<(), PlatformError>;

    /// Validate an authentication response against the issued challenge
    /// and the stored credential.
    async fn verify_assertion(
        &self,
        challenge: &[u8],
        credential: &StoredCredential,
        assertion: &CredentialAssertion,
        mode: VerificationMode,
    ) -> Result<VerifiedAssertion, PlatformError>;
}

/// Development verifier: the enrolled "public key" is a shared secret and
/// a valid response is `HMAC-SHA256(secret, challenge)`.
pub struct HmacVerifier;

impl HmacVerifier {
    pub fn new() -> Self {
        HmacVerifier
    }

    /// Client-side counterpart, used by the simulator and tests to
    /// produce valid responses.
    pub fn sign_challenge(secret: &[u8], challenge: &[u8]) -> Vec<u8> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
        hmac::sign(&key, challenge).as_ref().to_vec()
    }
}

impl Default for HmacVerifier {
    fn default() -> Self {
        HmacVerifier::new()
    }
}

#[async_trait]
impl CredentialVerifier for HmacVerifier {
    fn generate_challenge(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; 32];
        thread_rng().fill(bytes.as_mut_slice());
        bytes
    }

    async fn verify_registration(
        &self,
        challenge: &[u8],
        attestation: &RegistrationAttestation,
    ) -> Result<(), PlatformError> {
        if attestation.credential_id.is_empty() || attestation.public_key.is_empty() {
            return Err(PlatformError::VerificationFailed(
                "attestation missing credential id or key".to_string(),
            ));
        }

        let key = hmac::Key::new(hmac::HMAC_SHA256, &attestation.public_key);
        hmac::verify(&key, challenge, &attestation.signature).map_err(|_| {
            PlatformError::VerificationFailed("attestation signature mismatch".to_string())
        })
    }

    async fn verify_assertion(
        &self,
        challenge: &[u8],
        credential: &StoredCredential,
        assertion: &CredentialAssertion,
        mode: VerificationMode,
    ) -> Result<VerifiedAssertion, PlatformError> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, &credential.public_key);
        hmac::verify(&key, challenge, &assertion.signature).map_err(|_| {
            PlatformError::VerificationFailed("assertion signature mismatch".to_string())
        })?;

        // Replay counter must advance in every mode.
        if assertion.sign_count <= credential.sign_count {
            return Err(PlatformError::VerificationFailed(format!(
                "replay counter did not advance: {} <= {}",
                assertion.sign_count, credential.sign_count
            )));
        }

        if mode == VerificationMode::Strict && !assertion.user_verified {
            return Err(PlatformError::VerificationFailed(
                "strict mode requires user verification".to_string(),
            ));
        }

        Ok(VerifiedAssertion {
            credential_id: assertion.credential_id.clone(),
            new_sign_count: assertion.sign_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn credential(secret: &[u8], sign_count: u32) -> StoredCredential {
        StoredCredential {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            credential_id: "cred-1".to_string(),
            public_key: secret.to_vec(),
            sign_count,
            created_at: Utc::now(),
            last_used: None,
        }
    }

    fn assertion(secret: &[u8], challenge: &[u8], sign_count: u32, user_verified: bool) -> CredentialAssertion {
        CredentialAssertion {
            credential_id: "cred-1".to_string(),
            signature: HmacVerifier::sign_challenge(secret, challenge),
            sign_count,
            user_verified,
        }
    }

    #[tokio::test]
    async fn test_registration_round_trip() {
        let verifier = HmacVerifier::new();
        let challenge = verifier.generate_challenge();
        let secret = b"enrollment-secret";

        let attestation = RegistrationAttestation {
            credential_id: "cred-1".to_string(),
            public_key: secret.to_vec(),
            signature: HmacVerifier::sign_challenge(secret, &challenge),
        };
        assert!(verifier.verify_registration(&challenge, &attestation).await.is_ok());
    }

    #[tokio::test]
    async fn test_assertion_accepts_valid_signature() {
        let verifier = HmacVerifier::new();
        let challenge = verifier.generate_challenge();
        let secret = b"user-secret";
        let credential = credential(secret, 3);

        let verified = verifier
            .verify_assertion(
                &challenge,
                &credential,
                &assertion(secret, &challenge, 4, false),
                VerificationMode::Standard,
            )
            .await
            .unwrap();
        assert_eq!(verified.new_sign_count, 4);
    }

    #[tokio::test]
    async fn test_assertion_rejects_wrong_secret() {
        let verifier = HmacVerifier::new();
        let challenge = verifier.generate_challenge();
        let credential = credential(b"right-secret", 0);

        let err = verifier
            .verify_assertion(
                &challenge,
                &credential,
                &assertion(b"wrong-secret", &challenge, 1, false),
                VerificationMode::Standard,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::VerificationFailed(_)));
    }

    #[tokio::test]
    async fn test_assertion_rejects_replayed_counter() {
        let verifier = HmacVerifier::new();
        let challenge = verifier.generate_challenge();
        let secret = b"user-secret";
        let credential = credential(secret, 5);

        let err = verifier
            .verify_assertion(
                &challenge,
                &credential,
                &assertion(secret, &challenge, 5, false),
                VerificationMode::Standard,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::VerificationFailed(_)));
    }

    #[tokio::test]
    async fn test_strict_mode_requires_user_verification() {
        let verifier = HmacVerifier::new();
        let challenge = verifier.generate_challenge();
        let secret = b"user-secret";
        let credential = credential(secret, 0);

        let err = verifier
            .verify_assertion(
                &challenge,
                &credential,
                &assertion(secret, &challenge, 1, false),
                VerificationMode::Strict,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::VerificationFailed(_)));

        assert!(verifier
            .verify_assertion(
                &challenge,
                &credential,
                &assertion(secret, &challenge, 1, true),
                VerificationMode::Strict,
            )
            .await
            .is_ok());
    }
}
