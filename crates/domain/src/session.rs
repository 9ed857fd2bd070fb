//! Session identity as carried in the signed cookie.

use serde::{Deserialize, Serialize};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "ohq_session";

/// Who the request is from, as far as the cookie says.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub email: String,
    pub name: String,
    pub first_name: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl SessionIdentity {
    /// Whether any of the identity's groups appears in `groups`.
    pub fn in_any_group(&self, groups: &[String]) -> bool {
        self.groups.iter().any(|g| groups.contains(g))
    }
}
