//! HTTP transport for the authentication endpoints

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use rehearsal_core::User;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Registration form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub message: String,
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    user: User,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    message: String,
}

/// Authentication API operations
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn register(&self, form: &RegisterForm) -> Result<User>;

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse>;

    /// Exchange a refresh token for a new access token
    async fn refresh(&self, refresh_token: &str) -> Result<String>;

    async fn logout(&self, refresh_token: &str) -> Result<()>;

    /// GET `path` with a bearer access token
    async fn get_json(&self, path: &str, access_token: &str) -> Result<serde_json::Value>;
}

/// `reqwest`-backed implementation
pub struct HttpAuthApi {
    client: Client,
    base_url: String,
}

impl HttpAuthApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.api_url.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ClientError::InvalidResponse(format!("Failed to parse response: {e}")));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<MessageBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);

        if status == StatusCode::UNAUTHORIZED {
            Err(ClientError::Unauthorized(message))
        } else {
            Err(ClientError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn register(&self, form: &RegisterForm) -> Result<User> {
        let response: RegisterResponse = self
            .send(self.client.post(self.url("/api/auth/register")).json(form))
            .await?;
        Ok(response.user)
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let body = serde_json::json!({ "email": email, "password": password });
        self.send(self.client.post(self.url("/api/auth/login")).json(&body))
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String> {
        let body = serde_json::json!({ "refreshToken": refresh_token });
        let response: RefreshResponse = self
            .send(self.client.post(self.url("/api/auth/refresh")).json(&body))
            .await?;
        Ok(response.access_token)
    }

    async fn logout(&self, refresh_token: &str) -> Result<()> {
        let body = serde_json::json!({ "refreshToken": refresh_token });
        let _: MessageBody = self
            .send(self.client.post(self.url("/api/auth/logout")).json(&body))
            .await?;
        Ok(())
    }

    async fn get_json(&self, path: &str, access_token: &str) -> Result<serde_json::Value> {
        self.send(self.client.get(self.url(path)).bearer_auth(access_token))
            .await
    }
}
