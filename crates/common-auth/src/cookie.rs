use percent_encoding::percent_decode_str;

use crate::validator::{CookieValidator, Outcome};
use crate::AuthError;

pub const LOGGED_IN_COOKIE_PREFIX: &str = "wordpress_logged_in_";

/// Name of the logged-in cookie for a site with the given `COOKIEHASH`.
pub fn logged_in_cookie_name(cookie_hash: &str) -> String {
    format!("{LOGGED_IN_COOKIE_PREFIX}{cookie_hash}")
}

/// The slice of a stored password hash WordPress mixes into the cookie key:
/// characters 8 through 11. Shorter hashes yield whatever is left.
pub fn password_fragment(password_hash: &str) -> String {
    password_hash.chars().skip(8).take(4).collect()
}

/// A decoded `wordpress_logged_in_*` cookie value.
///
/// WordPress writes `username|expiration|token|hmac`, URL-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedInCookie {
    username: String,
    expiration: String,
    token: String,
    hmac: String,
}

impl LoggedInCookie {
    /// Decode and split a raw cookie value.
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        // Form encoding turns spaces in usernames into '+'.
        let unplussed = raw.replace('+', " ");
        let decoded = percent_decode_str(&unplussed)
            .decode_utf8()
            .map_err(|_| AuthError::MalformedCookie("cookie is not valid UTF-8"))?;

        let fields: Vec<&str> = decoded.split('|').collect();
        let [username, expiration, token, hmac] = fields.as_slice() else {
            return Err(AuthError::MalformedCookie("expected four '|' separated fields"));
        };
        if username.is_empty() {
            return Err(AuthError::MalformedCookie("username is empty"));
        }

        Ok(Self {
            username: username.to_string(),
            expiration: expiration.to_string(),
            token: token.to_string(),
            hmac: hmac.to_string(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn expiration(&self) -> &str {
        &self.expiration
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn hmac(&self) -> &str {
        &self.hmac
    }

    /// Check this cookie for a user whose password fragment the caller
    /// looked up in its own user store.
    pub fn verify(&self, validator: &CookieValidator, pass_frag: &str) -> bool {
        self.check(validator, pass_frag) == Outcome::Valid
    }

    pub fn check(&self, validator: &CookieValidator, pass_frag: &str) -> Outcome {
        validator.check(
            &self.username,
            pass_frag,
            &self.expiration,
            &self.hmac,
            &self.token,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{SystemTime, UNIX_EPOCH};

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_secs() as i64
    }

    fn raw_cookie(validator: &CookieValidator, user: &str, frag: &str, expiration: i64) -> String {
        let expiration = expiration.to_string();
        let hmac = validator.expected_digest(user, frag, &expiration, "tok123");
        format!("{user}%7C{expiration}%7Ctok123%7C{hmac}")
    }

    #[test]
    fn parses_url_encoded_cookie() {
        let cookie = LoggedInCookie::parse("alice%7C1700003600%7Ctok123%7Cabcdef").expect("parse");
        assert_eq!(cookie.username(), "alice");
        assert_eq!(cookie.expiration(), "1700003600");
        assert_eq!(cookie.token(), "tok123");
        assert_eq!(cookie.hmac(), "abcdef");
    }

    #[test]
    fn decodes_spaces_in_usernames() {
        let cookie = LoggedInCookie::parse("jane+doe|1|t|h").expect("parse");
        assert_eq!(cookie.username(), "jane doe");

        let cookie = LoggedInCookie::parse("jane%20doe|1|t|h").expect("parse");
        assert_eq!(cookie.username(), "jane doe");
    }

    #[test]
    fn rejects_wrong_field_count() {
        for raw in ["", "alice", "alice|1|tok", "alice|1|tok|hmac|extra"] {
            assert!(
                matches!(LoggedInCookie::parse(raw), Err(AuthError::MalformedCookie(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_empty_username() {
        assert!(matches!(
            LoggedInCookie::parse("|1|tok|hmac"),
            Err(AuthError::MalformedCookie("username is empty"))
        ));
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert!(LoggedInCookie::parse("%FF%FE|1|tok|hmac").is_err());
    }

    #[test]
    fn verifies_round_trip_through_raw_cookie() {
        let validator = CookieValidator::new("K", "S");
        let raw = raw_cookie(&validator, "alice", "pwd1", now() + 3600);
        let cookie = LoggedInCookie::parse(&raw).expect("parse");

        assert!(cookie.verify(&validator, "pwd1"));
        assert!(!cookie.verify(&validator, "pwd2"));
    }

    #[test]
    fn expired_cookie_reports_expired() {
        let validator = CookieValidator::new("K", "S");
        let raw = raw_cookie(&validator, "alice", "pwd1", now() - 10);
        let cookie = LoggedInCookie::parse(&raw).expect("parse");
        assert_eq!(cookie.check(&validator, "pwd1"), Outcome::Expired);
    }

    #[test]
    fn password_fragment_takes_characters_eight_to_twelve() {
        assert_eq!(password_fragment("$P$BabcdefghijklmnOPQ"), "efgh");
        assert_eq!(password_fragment("$P$Babcdef"), "ef");
        assert_eq!(password_fragment("short"), "");
    }

    #[test]
    fn cookie_name_uses_cookiehash() {
        assert_eq!(
            logged_in_cookie_name("84d1a0b2c6e0"),
            "wordpress_logged_in_84d1a0b2c6e0"
        );
    }
}
