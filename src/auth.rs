// SPDX-License-Identifier: MIT

//! Per-request auth context and flow-level auth policies
//!
//! An `AuthContext` is derived from caller-supplied credentials for the
//! duration of one invocation and never persisted. Policies run before any
//! step executes; a rejection aborts the invocation.

use serde_json::Value;

/// Claims decoded from the caller's credentials
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthContext {
    pub claims: Value,
}

impl AuthContext {
    pub fn new(claims: Value) -> Self {
        Self { claims }
    }

    /// Decode a bearer token. Tokens that parse as JSON become the claims
    /// object directly; anything else is kept under a `token` claim.
    pub fn from_token(token: &str) -> Self {
        match serde_json::from_str::<Value>(token) {
            Ok(claims @ Value::Object(_)) => Self { claims },
            _ => Self {
                claims: serde_json::json!({ "token": token }),
            },
        }
    }

    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }
}

/// Decides whether an invocation may proceed; evaluated before any step runs
pub trait AuthPolicy: Send + Sync {
    fn authorize(
        &self,
        auth: Option<&AuthContext>,
        input: &Value,
    ) -> std::result::Result<(), String>;
}

impl<F> AuthPolicy for F
where
    F: Fn(Option<&AuthContext>, &Value) -> std::result::Result<(), String> + Send + Sync,
{
    fn authorize(
        &self,
        auth: Option<&AuthContext>,
        input: &Value,
    ) -> std::result::Result<(), String> {
        self(auth, input)
    }
}

/// Policy requiring any authenticated caller
pub fn require_auth() -> impl AuthPolicy {
    |auth: Option<&AuthContext>, _input: &Value| {
        if auth.is_some() {
            Ok(())
        } else {
            Err("credentials required".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_decoding() {
        let ctx = AuthContext::from_token(r#"{"sub": "ada", "role": "admin"}"#);
        assert_eq!(ctx.claim("sub"), Some(&json!("ada")));

        let opaque = AuthContext::from_token("abc123");
        assert_eq!(opaque.claim("token"), Some(&json!("abc123")));
    }

    #[test]
    fn require_auth_policy() {
        let policy = require_auth();
        assert!(policy.authorize(None, &json!(null)).is_err());

        let ctx = AuthContext::from_token("t");
        assert!(policy.authorize(Some(&ctx), &json!(null)).is_ok());
    }

    #[test]
    fn closure_policies_see_claims_and_input() {
        let policy = |auth: Option<&AuthContext>, input: &Value| {
            let owner = auth
                .and_then(|a| a.claim("sub"))
                .and_then(Value::as_str)
                .ok_or_else(|| "no subject".to_string())?;
            if input.get("owner").and_then(Value::as_str) == Some(owner) {
                Ok(())
            } else {
                Err("not the owner".to_string())
            }
        };

        let ctx = AuthContext::from_token(r#"{"sub": "ada"}"#);
        assert!(policy
            .authorize(Some(&ctx), &json!({"owner": "ada"}))
            .is_ok());
        assert!(policy
            .authorize(Some(&ctx), &json!({"owner": "bob"}))
            .is_err());
    }
}
