use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tracing::warn;
use uuid::Uuid;

/// Role claim URI used by the upstream auth service.
pub const ROLE_CLAIM: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";
/// Name-identifier claim URI carrying the caller's id.
pub const NAME_ID_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";
/// Only managers may open a dashboard connection.
pub const REQUIRED_ROLE: &str = "manager";

/// Why a bearer token was rejected. Each variant surfaces as its own
/// `auth_error` reason on the wire.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    MalformedToken,
    InvalidSignature,
    Expired,
    InvalidClaims,
    NotManager,
    InvalidIdentity,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MalformedToken => write!(f, "Malformed token"),
            AuthError::InvalidSignature => write!(f, "Invalid token signature"),
            AuthError::Expired => write!(f, "Token expired"),
            AuthError::InvalidClaims => write!(f, "Invalid token claims"),
            AuthError::NotManager => write!(f, "User is not a manager"),
            AuthError::InvalidIdentity => write!(f, "Invalid user id in token"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Validate a bearer token and extract the manager id it was issued to.
///
/// Proves who signed the token, not that it is still live; liveness is the
/// token cache's call.
pub fn validate_token(
    token: &str,
    secret: &str,
    issuer: &str,
    audience: &str,
) -> Result<Uuid, AuthError> {
    // Any HMAC-family algorithm is acceptable; everything else, including
    // "none", fails before signature verification.
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[audience]);

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let token_data =
        decode::<serde_json::Value>(token, &decoding_key, &validation).map_err(|e| {
            warn!("JWT validation failed: {}", e);
            classify(e.kind())
        })?;
    let claims = token_data.claims;

    let role = claims.get(ROLE_CLAIM).and_then(|v| v.as_str());
    if role != Some(REQUIRED_ROLE) {
        warn!("User is not a manager, role: {:?}", role);
        return Err(AuthError::NotManager);
    }

    let user_id = claims
        .get(NAME_ID_CLAIM)
        .and_then(|v| v.as_str())
        .ok_or(AuthError::InvalidIdentity)?;

    Uuid::parse_str(user_id).map_err(|e| {
        warn!("Failed to parse user id as UUID: {}", e);
        AuthError::InvalidIdentity
    })
}

fn classify(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience | ErrorKind::MissingRequiredClaim(_) => {
            AuthError::InvalidClaims
        }
        ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => AuthError::Expired,
        _ => AuthError::MalformedToken,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";
    const ISSUER: &str = "https://auth.example.test";
    const AUDIENCE: &str = "taskboard";
    const MANAGER_ID: &str = "2bd90165-74a4-4a21-9890-7e437a9fd461";

    fn sign(claims: &serde_json::Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn manager_claims() -> serde_json::Value {
        json!({
            "iss": ISSUER,
            "aud": AUDIENCE,
            "exp": 4102444800u64,
            "http://schemas.microsoft.com/ws/2008/06/identity/claims/role": "manager",
            "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier": MANAGER_ID,
        })
    }

    fn validate(token: &str) -> Result<Uuid, AuthError> {
        validate_token(token, SECRET, ISSUER, AUDIENCE)
    }

    #[test]
    fn valid_manager_token_yields_identity() {
        let token = sign(&manager_claims());
        assert_eq!(validate(&token).unwrap(), Uuid::parse_str(MANAGER_ID).unwrap());
    }

    #[test]
    fn non_manager_role_is_rejected() {
        let mut claims = manager_claims();
        claims["http://schemas.microsoft.com/ws/2008/06/identity/claims/role"] = json!("developer");
        assert_eq!(validate(&sign(&claims)), Err(AuthError::NotManager));
    }

    #[test]
    fn missing_role_is_rejected() {
        let mut claims = manager_claims();
        claims
            .as_object_mut()
            .unwrap()
            .remove("http://schemas.microsoft.com/ws/2008/06/identity/claims/role");
        assert_eq!(validate(&sign(&claims)), Err(AuthError::NotManager));
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let mut claims = manager_claims();
        claims["iss"] = json!("https://someone-else.example.test");
        assert_eq!(validate(&sign(&claims)), Err(AuthError::InvalidClaims));
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let mut claims = manager_claims();
        claims["aud"] = json!("other-app");
        assert_eq!(validate(&sign(&claims)), Err(AuthError::InvalidClaims));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &manager_claims(),
            &EncodingKey::from_secret(b"some-other-secret"),
        )
        .unwrap();
        assert_eq!(validate(&token), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn garbage_token_is_malformed() {
        assert_eq!(validate("not-a-token"), Err(AuthError::MalformedToken));
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut claims = manager_claims();
        claims["exp"] = json!(1000000000u64);
        assert_eq!(validate(&sign(&claims)), Err(AuthError::Expired));
    }

    #[test]
    fn non_uuid_identity_is_rejected() {
        let mut claims = manager_claims();
        claims["http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier"] =
            json!("manager-42");
        assert_eq!(validate(&sign(&claims)), Err(AuthError::InvalidIdentity));
    }
}
