use jsonwebtoken::{DecodingKey, Validation, decode};

use alumnet_types::api::{Claims, Identity};

/// Close code sent to a socket whose credential did not verify.
pub const REJECT_CLOSE_CODE: u16 = 4001;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,
    #[error("invalid credential: {0}")]
    Invalid(String),
}

/// Maps a connection credential to a verified identity. Token issuance
/// lives with the external auth service.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWT verification against a shared secret.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, credential: &str) -> Result<Identity, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::Missing);
        }

        let token = decode::<Claims>(credential, &self.key, &self.validation)
            .map_err(|e| AuthError::Invalid(e.to_string()))?;

        Ok(Identity::from(token.claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use uuid::Uuid;

    fn token(secret: &str, exp: usize) -> (Uuid, String) {
        let sub = Uuid::new_v4();
        let claims = Claims {
            sub,
            username: "ann".into(),
            name: Some("Ann Lee".into()),
            exp,
        };
        let jwt = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        (sub, jwt)
    }

    fn far_future() -> usize {
        (chrono::Utc::now().timestamp() + 3600) as usize
    }

    #[test]
    fn valid_token_yields_identity() {
        let auth = JwtAuthenticator::new("s3cret");
        let (sub, jwt) = token("s3cret", far_future());

        let identity = auth.authenticate(&jwt).unwrap();
        assert_eq!(identity.user_id, sub);
        assert_eq!(identity.username, "ann");
        assert_eq!(identity.display_name, "Ann Lee");
    }

    #[test]
    fn wrong_secret_and_expiry_are_rejected() {
        let auth = JwtAuthenticator::new("s3cret");
        let (_, forged) = token("other", far_future());
        assert!(matches!(auth.authenticate(&forged), Err(AuthError::Invalid(_))));

        let (_, expired) = token("s3cret", 1);
        assert!(matches!(auth.authenticate(&expired), Err(AuthError::Invalid(_))));

        assert!(matches!(auth.authenticate("  "), Err(AuthError::Missing)));
    }
}
