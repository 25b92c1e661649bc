use axum::http::{HeaderMap, header::AUTHORIZATION};

use super::error_responses::AppError;

/// Checks `Authorization: Bearer <token>` against the configured internal token.
/// An unset token disables the internal API rather than leaving it open.
pub fn authorize_bearer(headers: &HeaderMap, expected_token: Option<&str>) -> Result<(), AppError> {
    let Some(expected_token) = expected_token else {
        return Err(AppError::Unavailable(
            "internal api token is not configured".to_string(),
        ));
    };

    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    if token == expected_token {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn matching_bearer_token_is_accepted() {
        assert!(authorize_bearer(&headers("Bearer s3cret"), Some("s3cret")).is_ok());
    }

    #[test]
    fn wrong_or_missing_token_is_rejected() {
        assert!(matches!(
            authorize_bearer(&headers("Bearer nope"), Some("s3cret")),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            authorize_bearer(&headers("s3cret"), Some("s3cret")),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            authorize_bearer(&HeaderMap::new(), Some("s3cret")),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn unconfigured_token_disables_the_api() {
        assert!(matches!(
            authorize_bearer(&headers("Bearer anything"), None),
            Err(AppError::Unavailable(_))
        ));
    }
}
