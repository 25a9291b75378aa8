//! services/api/src/web/cookies.rs
//!
//! Reading and writing the `session` (login) and `cart_session` (anonymous cart) cookies.

use axum::http::{header, HeaderMap};

pub const SESSION_COOKIE: &str = "session";
pub const CART_COOKIE: &str = "cart_session";

/// Finds a cookie by name across every `Cookie` header of the request.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|h| h.split(';'))
        .find_map(|c| c.trim().strip_prefix(name)?.strip_prefix('='))
        .filter(|v| !v.is_empty())
}

/// Builds a `Set-Cookie` value. A `max_age_secs` of zero expires the cookie.
pub fn build_cookie(name: &str, value: &str, max_age_secs: i64, secure: bool) -> String {
    format!(
        "{}={}; HttpOnly;{} SameSite=Lax; Path=/; Max-Age={}",
        name,
        value,
        if secure { " Secure;" } else { "" },
        max_age_secs
    )
}
