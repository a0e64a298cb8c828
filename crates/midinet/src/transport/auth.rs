// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session authentication: capability bits, credentials, and challenge
//! digests.
//!
//! The transport spec fixes the hash: SHA-256 over the challenge nonce
//! concatenated with the shared secret, or with username then password for
//! user auth. Nonces come from the system CSPRNG.

use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use crate::config::{AUTH_DIGEST_LEN, NONCE_LEN};
use crate::error::{Error, Result};

/// Capability bit: the client can answer a shared-secret challenge.
pub const CAP_INVITATION_WITH_AUTH: u8 = 1 << 0;
/// Capability bit: the client can answer a user/password challenge.
pub const CAP_INVITATION_WITH_USER_AUTH: u8 = 1 << 1;

/// Session credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    SharedSecret(String),
    UserPassword { user: String, password: String },
}

impl std::fmt::Debug for AuthMethod {
    // Credentials stay out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::SharedSecret(_) => write!(f, "AuthMethod::SharedSecret(..)"),
            AuthMethod::UserPassword { user, .. } => {
                write!(f, "AuthMethod::UserPassword {{ user: {:?}, .. }}", user)
            }
        }
    }
}

impl AuthMethod {
    /// The invitation capability bits these credentials can satisfy.
    pub fn capabilities(&self) -> u8 {
        match self {
            AuthMethod::SharedSecret(_) => CAP_INVITATION_WITH_AUTH,
            AuthMethod::UserPassword { .. } => CAP_INVITATION_WITH_USER_AUTH,
        }
    }

    /// Is this the user/password flavor (command 0x03 challenge)?
    pub fn is_user_auth(&self) -> bool {
        matches!(self, AuthMethod::UserPassword { .. })
    }

    /// The username sent alongside a user-auth digest.
    pub fn username(&self) -> Option<&str> {
        match self {
            AuthMethod::SharedSecret(_) => None,
            AuthMethod::UserPassword { user, .. } => Some(user),
        }
    }

    /// The challenge response digest for `nonce`.
    ///
    /// Shared secret: `SHA256(nonce || secret)`.
    /// User/password: `SHA256(nonce || user || password)`.
    pub fn digest(&self, nonce: &[u8; NONCE_LEN]) -> [u8; AUTH_DIGEST_LEN] {
        let mut ctx = digest::Context::new(&digest::SHA256);
        ctx.update(nonce);
        match self {
            AuthMethod::SharedSecret(secret) => ctx.update(secret.as_bytes()),
            AuthMethod::UserPassword { user, password } => {
                ctx.update(user.as_bytes());
                ctx.update(password.as_bytes());
            }
        }
        let out = ctx.finish();
        out.as_ref().try_into().expect("SHA-256 is 32 bytes")
    }

    /// Verify a client digest against these (server-side) credentials.
    ///
    /// For user auth the reply's username must match too.
    pub fn verify(
        &self,
        nonce: &[u8; NONCE_LEN],
        digest: &[u8; AUTH_DIGEST_LEN],
        username: Option<&str>,
    ) -> bool {
        match self {
            AuthMethod::SharedSecret(_) => self.digest(nonce) == *digest,
            AuthMethod::UserPassword { user, .. } => {
                username == Some(user.as_str()) && self.digest(nonce) == *digest
            }
        }
    }
}

/// A fresh challenge nonce from the system CSPRNG.
pub fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut nonce = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| Error::AuthFailed("system CSPRNG unavailable".into()))?;
    Ok(nonce)
}

/// A random 32-bit value (UCMEP, ping ids).
pub fn random_u32() -> u32 {
    let mut bytes = [0u8; 4];
    // The CSPRNG only fails on broken platforms; a degraded id is still
    // usable for UCMEP/ping purposes.
    if SystemRandom::new().fill(&mut bytes).is_err() {
        log::warn!("[AUTH] CSPRNG unavailable, falling back to address entropy");
        let fallback = &bytes as *const _ as usize;
        return fallback as u32 ^ 0xA5A5_5A5A;
    }
    u32::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_secret_digest_matches_formula() {
        let nonce = [0x11u8; NONCE_LEN];
        let auth = AuthMethod::SharedSecret("hunter2".into());

        let mut ctx = digest::Context::new(&digest::SHA256);
        ctx.update(&nonce);
        ctx.update(b"hunter2");
        let expected: [u8; 32] = ctx.finish().as_ref().try_into().unwrap();

        assert_eq!(auth.digest(&nonce), expected);
        assert!(auth.verify(&nonce, &expected, None));
    }

    #[test]
    fn test_user_password_digest_concatenation_order() {
        let nonce = [0x22u8; NONCE_LEN];
        let auth = AuthMethod::UserPassword {
            user: "alice".into(),
            password: "secret".into(),
        };

        let mut ctx = digest::Context::new(&digest::SHA256);
        ctx.update(&nonce);
        ctx.update(b"alice");
        ctx.update(b"secret");
        let expected: [u8; 32] = ctx.finish().as_ref().try_into().unwrap();

        assert_eq!(auth.digest(&nonce), expected);
        assert!(auth.verify(&nonce, &expected, Some("alice")));
        assert!(!auth.verify(&nonce, &expected, Some("bob")), "username must match");
        assert!(!auth.verify(&nonce, &expected, None));
    }

    #[test]
    fn test_wrong_digest_fails_verification() {
        let nonce = [0u8; NONCE_LEN];
        let auth = AuthMethod::SharedSecret("right".into());
        let wrong = AuthMethod::SharedSecret("wrong".into()).digest(&nonce);
        assert!(!auth.verify(&nonce, &wrong, None));
    }

    #[test]
    fn test_nonces_are_unique() {
        let a = generate_nonce().expect("nonce");
        let b = generate_nonce().expect("nonce");
        assert_ne!(a, b, "2^-128 collision chance, effectively never");
    }

    #[test]
    fn test_debug_does_not_leak_credentials() {
        let auth = AuthMethod::SharedSecret("topsecret".into());
        assert!(!format!("{:?}", auth).contains("topsecret"));

        let auth = AuthMethod::UserPassword {
            user: "alice".into(),
            password: "topsecret".into(),
        };
        assert!(!format!("{:?}", auth).contains("topsecret"));
    }
}
