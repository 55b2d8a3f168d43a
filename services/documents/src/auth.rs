use crate::config::AdminCredential;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use serde::Serialize;

/// What the gateway knows about the caller of a request
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub bearer_token: Option<String>,
}

impl CallerContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let bearer_token = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                let (scheme, token) = value.split_once(' ')?;
                scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_string())
            })
            .filter(|token| !token.is_empty());

        Self { bearer_token }
    }
}

/// An authenticated administrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminIdentity {
    pub name: String,
}

/// Decides whether a caller may run administrative operations
pub trait AdminAuthorizer: Send + Sync {
    fn authenticate(&self, caller: &CallerContext) -> Option<AdminIdentity>;

    fn is_authorized_admin(&self, caller: &CallerContext) -> bool {
        self.authenticate(caller).is_some()
    }
}

/// Accepts bearer tokens listed in the configuration
#[derive(Debug, Clone, Default)]
pub struct TokenAuthorizer {
    admins: Vec<AdminCredential>,
}

impl TokenAuthorizer {
    pub fn new(admins: Vec<AdminCredential>) -> Self {
        let admins = admins
            .into_iter()
            .filter(|admin| !admin.token.is_empty())
            .collect();
        Self { admins }
    }
}

impl AdminAuthorizer for TokenAuthorizer {
    fn authenticate(&self, caller: &CallerContext) -> Option<AdminIdentity> {
        let token = caller.bearer_token.as_deref()?;
        self.admins
            .iter()
            .find(|admin| constant_time_eq(admin.token.as_bytes(), token.as_bytes()))
            .map(|admin| AdminIdentity {
                name: admin.name.clone(),
            })
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
