use keyward_auth::{AuthContext, RawToken};
use keyward_core::{PrincipalId, TokenId};

/// Principal context for a request (authenticated identity + presented token).
///
/// Inserted by the auth middleware; present on every protected route.
#[derive(Debug, Clone)]
pub struct PrincipalContext {
    auth: AuthContext,
}

impl PrincipalContext {
    pub fn new(auth: AuthContext) -> Self {
        Self { auth }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.auth.principal_id
    }

    pub fn token_id(&self) -> TokenId {
        self.auth.token_id
    }

    pub fn raw_token(&self) -> &RawToken {
        &self.auth.raw_token
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }
}
