//! Common authentication primitives shared across session gate services.
//!
//! Validates WordPress `logged_in` cookies offline, using the secrets read
//! from `wp-config.php` by [`common_config::WpConfig`].

mod cookie;
mod validator;

use common_config::ConfigError;
use thiserror::Error;

pub use cookie::{
    logged_in_cookie_name, password_fragment, LoggedInCookie, LOGGED_IN_COOKIE_PREFIX,
};
pub use validator::{CookieValidator, Outcome};

/// Errors raised while preparing a cookie for validation.
///
/// Validation itself never fails; it answers with a boolean.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The raw cookie could not be split into its fields.
    #[error("malformed logged-in cookie: {0}")]
    MalformedCookie(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
