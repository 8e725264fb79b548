use log::debug;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use crate::{
    api::{
        AuthApi, AuthInfo, AuthResponse, KeySalt, NewTrustedDevice, SecondFactor, TrustedDevice,
        UnprivatizationContext, User,
    },
    crypto::compute_credential_proof,
    ApiError, DeviceId,
};

const SESSION_HEADER: &str = "x-hc-uid";

/// `reqwest`-backed implementation of [`AuthApi`] against the platform REST
/// endpoints.
///
/// The session tokens issued by `auth` are kept internally so that the
/// remaining calls of the same attempt are sent authenticated; a fresh
/// `HttpAuthApi` should be used per login attempt.
pub struct HttpAuthApi {
    base_url: String,
    client: reqwest::Client,
    tokens: std::sync::RwLock<Option<SessionTokens>>,
}

#[derive(Clone)]
struct SessionTokens {
    uid: String,
    access_token: String,
}

/// Error body shape shared by every platform endpoint.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiErrorBody {
    code: u32,
    error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserResponse {
    user: User,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddressesResponse {
    addresses: Vec<crate::api::Address>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeySaltsResponse {
    key_salts: Vec<KeySalt>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeviceResponse {
    device: TrustedDevice,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DevicesResponse {
    devices: Vec<TrustedDevice>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MutatedResponse {
    #[serde(default)]
    mutated: bool,
}

impl HttpAuthApi {
    /// Creates a client for the given API origin, e.g. `https://account.halcyon.app/api`.
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            tokens: std::sync::RwLock::new(None),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header(reqwest::header::ACCEPT, "application/json");

        let tokens = self
            .tokens
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(tokens) = tokens {
            builder = builder
                .header(SESSION_HEADER, tokens.uid)
                .bearer_auth(tokens.access_token);
        }
        builder
    }

    fn store_tokens(&self, response: &AuthResponse) {
        *self
            .tokens
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(SessionTokens {
            uid: response.uid.clone(),
            access_token: response.access_token.clone(),
        });
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        Err(decode_error(status, response.text().await.ok()))
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(decode_error(status, response.text().await.ok()))
    }
}

fn decode_error(status: StatusCode, body: Option<String>) -> ApiError {
    let body = body.unwrap_or_default();
    match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(parsed) => {
            debug!("request rejected: status {status}, code {}", parsed.code);
            ApiError::ResponseContent {
                status,
                code: parsed.code,
                message: parsed.error,
            }
        }
        // Proxies and load balancers answer with non-JSON bodies.
        Err(_) => ApiError::ResponseContent {
            status,
            code: 0,
            message: body,
        },
    }
}

#[async_trait::async_trait]
impl AuthApi for HttpAuthApi {
    async fn auth_info(&self, username: &str) -> Result<AuthInfo, ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct Payload<'a> {
            username: &'a str,
        }
        self.send(self.request(Method::POST, "/auth/info").json(&Payload { username }))
            .await
    }

    async fn auth(
        &self,
        username: &str,
        password: &str,
        info: &AuthInfo,
        challenge: Option<&serde_json::Value>,
    ) -> Result<AuthResponse, ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct Payload<'a> {
            username: &'a str,
            client_proof: String,
            server_nonce: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            payload: Option<&'a serde_json::Value>,
        }
        let response: AuthResponse = self
            .send(self.request(Method::POST, "/auth").json(&Payload {
                username,
                client_proof: compute_credential_proof(&info.server_nonce, password),
                server_nonce: &info.server_nonce,
                payload: challenge,
            }))
            .await?;
        self.store_tokens(&response);
        Ok(response)
    }

    async fn submit_second_factor(&self, factor: &SecondFactor) -> Result<(), ApiError> {
        self.send_empty(self.request(Method::POST, "/auth/2fa").json(factor))
            .await
    }

    async fn fetch_user(&self) -> Result<User, ApiError> {
        let response: UserResponse = self.send(self.request(Method::GET, "/users/me")).await?;
        Ok(response.user)
    }

    async fn fetch_addresses(&self) -> Result<Vec<crate::api::Address>, ApiError> {
        let response: AddressesResponse =
            self.send(self.request(Method::GET, "/addresses")).await?;
        Ok(response.addresses)
    }

    async fn fetch_key_salts(&self) -> Result<Vec<KeySalt>, ApiError> {
        let response: KeySaltsResponse =
            self.send(self.request(Method::GET, "/keys/salts")).await?;
        Ok(response.key_salts)
    }

    async fn upgrade_credential_hash(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(), ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct Payload<'a> {
            username: &'a str,
            client_proof: String,
            server_nonce: &'a str,
        }
        // The rehash needs a fresh nonce of its own.
        let info = self.auth_info(username).await?;
        self.send_empty(self.request(Method::POST, "/auth/upgrade").json(&Payload {
            username,
            client_proof: compute_credential_proof(&info.server_nonce, password),
            server_nonce: &info.server_nonce,
        }))
        .await
    }

    async fn change_password(&self, new_password: &str) -> Result<(), ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct Payload<'a> {
            new_password: &'a str,
        }
        self.send_empty(
            self.request(Method::PUT, "/settings/password")
                .json(&Payload { new_password }),
        )
        .await
    }

    async fn setup_address_keys(&self, new_password: &str) -> Result<(), ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct Payload<'a> {
            new_password: &'a str,
        }
        self.send_empty(
            self.request(Method::POST, "/keys/setup")
                .json(&Payload { new_password }),
        )
        .await
    }

    async fn upgrade_keys(&self) -> Result<(), ApiError> {
        self.send_empty(self.request(Method::POST, "/keys/upgrade"))
            .await
    }

    async fn migrate_keys(&self) -> Result<bool, ApiError> {
        let response: MutatedResponse = self
            .send(self.request(Method::POST, "/keys/migrate"))
            .await?;
        Ok(response.mutated)
    }

    async fn restore_recovery_keys(&self) -> Result<bool, ApiError> {
        let response: MutatedResponse = self
            .send(self.request(Method::POST, "/keys/recovery/restore"))
            .await?;
        Ok(response.mutated)
    }

    async fn fetch_unprivatization_context(&self) -> Result<UnprivatizationContext, ApiError> {
        self.send(self.request(Method::GET, "/members/me/unprivatization"))
            .await
    }

    async fn create_trusted_device(
        &self,
        device: &NewTrustedDevice,
    ) -> Result<TrustedDevice, ApiError> {
        let response: DeviceResponse = self
            .send(self.request(Method::POST, "/auth/devices").json(device))
            .await?;
        Ok(response.device)
    }

    async fn fetch_trusted_devices(&self) -> Result<Vec<TrustedDevice>, ApiError> {
        let response: DevicesResponse =
            self.send(self.request(Method::GET, "/auth/devices")).await?;
        Ok(response.devices)
    }

    async fn fetch_trusted_device(&self, id: DeviceId) -> Result<TrustedDevice, ApiError> {
        let response: DeviceResponse = self
            .send(self.request(Method::GET, &format!("/auth/devices/{id}")))
            .await?;
        Ok(response.device)
    }

    async fn activate_trusted_device(
        &self,
        id: DeviceId,
        encrypted_secret: &str,
    ) -> Result<(), ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct Payload<'a> {
            encrypted_secret: &'a str,
        }
        self.send_empty(
            self.request(Method::PUT, &format!("/auth/devices/{id}"))
                .json(&Payload { encrypted_secret }),
        )
        .await
    }

    async fn delete_trusted_device(&self, id: DeviceId) -> Result<(), ApiError> {
        self.send_empty(self.request(Method::DELETE, &format!("/auth/devices/{id}")))
            .await
    }

    async fn revoke_session(&self, uid: &str) -> Result<(), ApiError> {
        self.send_empty(self.request(Method::DELETE, &format!("/auth/sessions/{uid}")))
            .await
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::api::PasswordMode;

    fn make_api(server: &MockServer) -> HttpAuthApi {
        HttpAuthApi::new(server.uri(), reqwest::Client::new())
    }

    fn auth_success_body(user_id: Uuid) -> serde_json::Value {
        serde_json::json!({
            "UID": "session-uid-1",
            "AccessToken": "access-1",
            "RefreshToken": "refresh-1",
            "UserId": user_id,
            "TwoFactor": { "Enabled": false },
            "PasswordMode": 1,
        })
    }

    #[tokio::test]
    async fn auth_info_round_trip() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/auth/info"))
            .and(matchers::body_json(serde_json::json!({
                "Username": "jane"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Version": 4,
                "ServerNonce": "nonce-1",
            })))
            .mount(&server)
            .await;

        let api = make_api(&server);
        let info = api.auth_info("jane").await.unwrap();
        assert_eq!(info.version, 4);
        assert_eq!(info.server_nonce, "nonce-1");
    }

    #[tokio::test]
    async fn auth_stores_session_tokens_for_subsequent_calls() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(auth_success_body(user_id)))
            .mount(&server)
            .await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/users/me"))
            .and(matchers::header(SESSION_HEADER, "session-uid-1"))
            .and(matchers::header("authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "User": { "ID": user_id, "Name": "jane", "Keys": [] }
            })))
            .mount(&server)
            .await;

        let api = make_api(&server);
        let info = AuthInfo {
            version: 4,
            server_nonce: "nonce-1".into(),
        };
        let response = api.auth("jane", "pw1", &info, None).await.unwrap();
        assert_eq!(response.password_mode, PasswordMode::One);

        let user = api.fetch_user().await.unwrap();
        assert_eq!(user.name, "jane");
        assert!(user.keys.is_empty());
    }

    #[tokio::test]
    async fn server_error_bodies_are_decoded() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/auth/info"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "Code": 2028,
                "Error": "Invalid username",
            })))
            .mount(&server)
            .await;

        let api = make_api(&server);
        let err = api.auth_info("nope").await.unwrap_err();
        match err {
            ApiError::ResponseContent {
                status,
                code,
                message,
            } => {
                assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
                assert_eq!(code, 2028);
                assert_eq!(message, "Invalid username");
            }
            other => panic!("expected ResponseContent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_error_bodies_fall_back_to_code_zero() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/users/me"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let api = make_api(&server);
        let err = api.fetch_user().await.unwrap_err();
        assert_eq!(err.response_code(), Some(0));
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
    }
}
