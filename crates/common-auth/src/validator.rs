use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use common_config::{WpConfig, LOGGED_IN_KEY, LOGGED_IN_SALT};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::AuthError;

type HmacMd5 = Hmac<Md5>;
type HmacSha256 = Hmac<Sha256>;

/// Why a cookie was accepted or rejected.
///
/// Callers that only need the authorization decision use
/// [`CookieValidator::validate`]; this is for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Valid,
    Expired,
    /// The expiration field is not an integer timestamp.
    Malformed,
    Mismatched,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Valid => "valid",
            Outcome::Expired => "expired",
            Outcome::Malformed => "malformed",
            Outcome::Mismatched => "mismatched",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateless checker for the `logged_in` cookie scheme.
///
/// Holds only the scheme salt (`LOGGED_IN_KEY` followed by
/// `LOGGED_IN_SALT`), fixed at construction. Safe to share between threads.
#[derive(Clone)]
pub struct CookieValidator {
    salt: Box<[u8]>,
}

impl CookieValidator {
    pub fn new(login_key: &str, login_salt: &str) -> Self {
        let salt = [login_key.as_bytes(), login_salt.as_bytes()].concat();
        Self {
            salt: salt.into_boxed_slice(),
        }
    }

    /// Build a validator from the secrets defined in `wp-config.php`.
    pub fn from_config(config: &WpConfig) -> Result<Self, AuthError> {
        Ok(Self::new(
            config.get(LOGGED_IN_KEY)?,
            config.get(LOGGED_IN_SALT)?,
        ))
    }

    /// Returns `true` only for an unexpired cookie whose digest matches.
    ///
    /// Expired, forged and malformed cookies are indistinguishable here; use
    /// [`CookieValidator::check`] to find out which one it was.
    pub fn validate(
        &self,
        user: &str,
        pass_frag: &str,
        expiration: &str,
        provided_digest: &str,
        token: &str,
    ) -> bool {
        self.check(user, pass_frag, expiration, provided_digest, token) == Outcome::Valid
    }

    /// Same as [`CookieValidator::validate`] but reports the outcome.
    pub fn check(
        &self,
        user: &str,
        pass_frag: &str,
        expiration: &str,
        provided_digest: &str,
        token: &str,
    ) -> Outcome {
        self.check_at(user, pass_frag, expiration, provided_digest, token, unix_now())
    }

    /// Evaluate a cookie against an explicit clock, in unix seconds.
    pub fn check_at(
        &self,
        user: &str,
        pass_frag: &str,
        expiration: &str,
        provided_digest: &str,
        token: &str,
        now: i64,
    ) -> Outcome {
        let outcome = match is_expired(expiration, now) {
            None => Outcome::Malformed,
            Some(true) => Outcome::Expired,
            Some(false) => {
                let key = self.derive_key(user, pass_frag, expiration, token);
                let expected = expected_hash(&key, user, expiration, token);

                // Compare MACs of both digests rather than the digests themselves.
                let provided_mac = hmac_md5(key.as_bytes(), provided_digest.as_bytes());
                let expected_mac = hmac_md5(key.as_bytes(), expected.as_bytes());
                if bool::from(provided_mac[..].ct_eq(&expected_mac[..])) {
                    Outcome::Valid
                } else {
                    Outcome::Mismatched
                }
            }
        };

        if outcome != Outcome::Valid {
            tracing::debug!(%user, %outcome, "rejected logged-in cookie");
        }
        outcome
    }

    /// The digest WordPress writes into a cookie for these fields.
    pub fn expected_digest(
        &self,
        user: &str,
        pass_frag: &str,
        expiration: &str,
        token: &str,
    ) -> String {
        let key = self.derive_key(user, pass_frag, expiration, token);
        expected_hash(&key, user, expiration, token)
    }

    /// Per-cookie key: the hex HMAC-MD5 of the cookie fields under the salt.
    /// The hex text itself, not its decoded bytes, keys the next step.
    fn derive_key(&self, user: &str, pass_frag: &str, expiration: &str, token: &str) -> String {
        let message = format!("{user}|{pass_frag}|{expiration}|{token}");
        hex::encode(hmac_md5(&self.salt, message.as_bytes()))
    }
}

impl fmt::Debug for CookieValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieValidator")
            .field("salt_length", &self.salt.len())
            .finish_non_exhaustive()
    }
}

/// `None` when `expiration` is not an integer. Integers too large for an
/// `i64` lie beyond any clock: far future when positive, past when negative.
fn is_expired(expiration: &str, now: i64) -> Option<bool> {
    let text = expiration.trim();
    if let Ok(expires_at) = text.parse::<i64>() {
        return Some(expires_at < now);
    }

    let (negative, digits) = match text.as_bytes() {
        [b'-', rest @ ..] => (true, rest),
        [b'+', rest @ ..] => (false, rest),
        rest => (false, rest),
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(negative)
}

fn expected_hash(key: &str, user: &str, expiration: &str, token: &str) -> String {
    let message = format!("{user}|{expiration}|{token}");
    hex::encode(hmac_sha256(key.as_bytes(), message.as_bytes()))
}

fn hmac_md5(key: &[u8], message: &[u8]) -> [u8; 16] {
    let mut mac = HmacMd5::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}
