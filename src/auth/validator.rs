//! JWT validation: decodes and verifies a bearer token against the
//! cached JWKS, per `spec.md` §4.1.
//!
//! Grounded on the teacher's `core::auth::providers::entra::EntraProvider`
//! token-validation shape (header peek for `kid`, `jsonwebtoken`
//! `DecodingKey`/`Validation`), generalized to the gateway's single
//! generic-OIDC provider instead of Navius's per-provider trait object.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::{Map, Value};

use super::jwks::JwksCache;
use crate::error::GatewayError;

pub struct JwtValidatorSettings<'a> {
    pub issuer: Option<&'a str>,
    pub audience: Option<&'a str>,
    pub algorithms: &'a [String],
}

/// Validates a bearer token against the JWKS cache and returns its
/// claims as a JSON object, per the algorithm in `spec.md` §4.1.
pub async fn validate(
    token: &str,
    jwks: &JwksCache,
    settings: &JwtValidatorSettings<'_>,
) -> Result<Map<String, Value>, GatewayError> {
    let header = decode_header(token)
        .map_err(|e| GatewayError::unauthorized(format!("invalid token header: {e}")))?;

    let kid = header
        .kid
        .ok_or_else(|| GatewayError::unauthorized("token header is missing 'kid'"))?;

    let allowed_algorithms = parse_algorithms(settings.algorithms)?;
    if !allowed_algorithms.contains(&header.alg) {
        return Err(GatewayError::unauthorized(format!(
            "algorithm {:?} is not in the configured allow-list",
            header.alg
        )));
    }

    let jwk = jwks
        .key_for_kid(&kid)
        .await?
        .ok_or_else(|| GatewayError::unauthorized(format!("no JWKS key found for kid '{kid}'")))?;

    let decoding_key = DecodingKey::from_jwk(&jwk)
        .map_err(|e| GatewayError::unauthorized(format!("unusable JWKS key: {e}")))?;

    let mut validation = Validation::new(header.alg);
    validation.set_required_spec_claims(&["exp", "iat", "nbf"]);
    validation.validate_nbf = true;
    // `iss`/`aud` are validated only when `Validation::iss`/`aud` are set;
    // leaving them unset (the default) skips that check entirely.
    if let Some(issuer) = settings.issuer {
        validation.set_issuer(&[issuer]);
    }
    match settings.audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }

    let token_data = decode::<Map<String, Value>>(token, &decoding_key, &validation)
        .map_err(|e| GatewayError::unauthorized(format!("token validation failed: {e}")))?;

    Ok(token_data.claims)
}

fn algorithm_from_name(name: &str) -> Option<Algorithm> {
    match name.to_uppercase().as_str() {
        "HS256" => Some(Algorithm::HS256),
        "HS384" => Some(Algorithm::HS384),
        "HS512" => Some(Algorithm::HS512),
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "ES256" => Some(Algorithm::ES256),
        "ES384" => Some(Algorithm::ES384),
        "PS256" => Some(Algorithm::PS256),
        "PS384" => Some(Algorithm::PS384),
        "PS512" => Some(Algorithm::PS512),
        "EDDSA" => Some(Algorithm::EdDSA),
        _ => None,
    }
}

fn parse_algorithms(configured: &[String]) -> Result<Vec<Algorithm>, GatewayError> {
    if configured.is_empty() {
        return Err(GatewayError::internal(
            "no algorithms configured for JWT validation",
        ));
    }
    configured
        .iter()
        .map(|name| {
            algorithm_from_name(name)
                .ok_or_else(|| GatewayError::internal(format!("unsupported algorithm: {name}")))
        })
        .collect()
}
