//! Bearer tokens.
//!
//! Only the SHA-256 fingerprint of a token is ever stored. The plaintext is
//! handed to the client once, at issuance, and then dropped.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of random bytes behind each token.
const TOKEN_ENTROPY_BYTES: usize = 16;

/// Length of an encoded plaintext: 16 bytes in unpadded base64.
pub const TOKEN_PLAINTEXT_LEN: usize = 22;

/// Intended use of a token. A token of one scope never authenticates
/// a request that asks for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Activation,
    Authentication,
    PasswordReset,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Activation => "activation",
            Scope::Authentication => "authentication",
            Scope::PasswordReset => "password-reset",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-way digest of a token plaintext.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(plaintext: &str) -> Self {
        Self(Sha256::digest(plaintext.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// Keep digests out of logs.
impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// A freshly issued token, still carrying its plaintext.
#[derive(Debug, Clone, Serialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub plaintext: String,
    #[serde(skip)]
    pub fingerprint: Fingerprint,
    #[serde(skip)]
    pub user_id: i64,
    #[serde(skip)]
    pub scope: Scope,
    pub expiry: DateTime<Utc>,
}

impl Token {
    /// Generate a new random token for `user_id` valid for `ttl`.
    pub fn generate(user_id: i64, ttl: Duration, scope: Scope) -> Self {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let plaintext = URL_SAFE_NO_PAD.encode(bytes);

        Self {
            fingerprint: Fingerprint::of(&plaintext),
            plaintext,
            user_id,
            scope,
            expiry: Utc::now() + ttl,
        }
    }

    /// The part of the token the credential store keeps.
    pub fn record(&self) -> TokenRecord {
        TokenRecord {
            fingerprint: self.fingerprint,
            user_id: self.user_id,
            scope: self.scope,
            expiry: self.expiry,
        }
    }
}

/// Stored form of a token: no plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub fingerprint: Fingerprint,
    pub user_id: i64,
    pub scope: Scope,
    pub expiry: DateTime<Utc>,
}

impl TokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}
