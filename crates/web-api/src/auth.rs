//! JWT 认证模块
//!
//! 会话令牌由外部身份系统签发，本服务只负责验证并取出用户身份。
//! `generate_token` 供测试与运维工具使用。

use axum::http::HeaderMap;
use config::JwtConfig;
use domain::{SessionUser, UserId};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    /// 显示名称
    pub name: String,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

impl From<Claims> for SessionUser {
    fn from(claims: Claims) -> Self {
        SessionUser::new(UserId::from(claims.user_id), claims.name)
    }
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token
    pub fn generate_token(&self, user: &SessionUser) -> Result<String, ApiError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            user_id: Uuid::from(user.user_id),
            name: user.display_name.clone(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|err| {
            ApiError::internal_server_error(format!("Token generation failed: {}", err))
        })
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {}", err)))
    }

    pub fn session_from_token(&self, token: &str) -> Result<SessionUser, ApiError> {
        self.verify_token(token).map(SessionUser::from)
    }

    /// 从 headers 中提取和验证 token
    pub fn extract_session_from_headers(
        &self,
        headers: &HeaderMap,
    ) -> Result<SessionUser, ApiError> {
        let auth_header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

        self.session_from_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    fn service() -> JwtService {
        JwtService::new(JwtConfig {
            secret: "unit-test-secret-with-at-least-32-characters".to_string(),
            expiration_hours: 1,
        })
    }

    #[test]
    fn test_token_carries_session_identity() {
        let jwt = service();
        let user = SessionUser::new(UserId::from(Uuid::new_v4()), "alice");

        let token = jwt.generate_token(&user).expect("token");
        let session = jwt.session_from_token(&token).expect("session");

        assert_eq!(session, user);
    }

    #[test]
    fn test_rejects_foreign_and_malformed_tokens() {
        let jwt = service();
        let other = JwtService::new(JwtConfig {
            secret: "another-secret-with-at-least-32-characters!".to_string(),
            expiration_hours: 1,
        });
        let user = SessionUser::new(UserId::from(Uuid::new_v4()), "mallory");
        let forged = other.generate_token(&user).expect("token");

        assert!(jwt.verify_token(&forged).is_err());
        assert!(jwt.verify_token("not-a-jwt").is_err());
    }

    #[test]
    fn test_extracts_bearer_header() {
        let jwt = service();
        let user = SessionUser::new(UserId::from(Uuid::new_v4()), "bob");
        let token = jwt.generate_token(&user).expect("token");

        let mut headers = HeaderMap::new();
        assert!(jwt.extract_session_from_headers(&headers).is_err());

        headers.insert(AUTHORIZATION, token.parse().expect("header"));
        assert!(jwt.extract_session_from_headers(&headers).is_err());

        headers.insert(
            AUTHORIZATION,
            format!("Bearer {token}").parse().expect("header"),
        );
        assert_eq!(
            jwt.extract_session_from_headers(&headers).expect("session"),
            user
        );
    }
}
