use crate::models::{Envelope, Instance};
use crate::traits::{ApiConnector, ApiError, ComputeApi};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://www.autodl.com/api/v1";

const LOGIN_PATH: &str = "/new_login";
const PASSPORT_PATH: &str = "/passport";
const INSTANCE_PATH: &str = "/instance";
const POWER_ON_PATH: &str = "/instance/power_on";
const POWER_OFF_PATH: &str = "/instance/power_off";
const BALANCE_PATH: &str = "/wallet";

const APP_VERSION: &str = "v5.56.0";
const INSTANCE_PAGE_SIZE: u32 = 10;

/// The login endpoint expects the SHA-1 hex digest, never the raw password.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// HTTP client for the AutoDL console API.
pub struct AutoDlClient {
    client: Client,
    base_url: String,
    username: String,
    password_hash: String,
    token: RwLock<Option<String>>,
}

impl AutoDlClient {
    pub fn new(base_url: &str, username: &str, password: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(default_headers())
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password_hash: hash_password(password),
            token: RwLock::new(None),
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Envelope, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &url);

        if let Some(token) = token {
            request = request.header("authorization", token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        response
            .json::<Envelope>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn current_token(&self) -> Result<String, ApiError> {
        let cached = self.token.read().clone();
        match cached {
            Some(token) => Ok(token),
            None => self.login().await,
        }
    }

    /// Sends an authenticated request, logging in again once if the token expired.
    async fn authorized(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Envelope, ApiError> {
        let token = self.current_token().await?;
        let envelope = self.send(method.clone(), path, body, Some(&token)).await?;
        if !envelope.is_auth_expired() {
            return Ok(envelope);
        }

        debug!("Session token expired for {}, logging in again", self.username);
        let token = self.login().await?;
        let envelope = self.send(method, path, body, Some(&token)).await?;
        if envelope.is_auth_expired() {
            *self.token.write() = None;
            return Err(ApiError::AuthFailed(envelope.message()));
        }
        Ok(envelope)
    }

    fn data_of(envelope: Envelope) -> Result<Value, ApiError> {
        if envelope.is_success() {
            Ok(envelope.data)
        } else {
            Err(ApiError::Api {
                msg: envelope.message(),
                code: envelope.code,
            })
        }
    }
}

#[async_trait]
impl ComputeApi for AutoDlClient {
    async fn login(&self) -> Result<String, ApiError> {
        let body = json!({
            "phone": self.username,
            "password": self.password_hash,
            "v_code": "",
            "phone_area": "+86",
            "picture_id": null,
        });

        let login = self.send(Method::POST, LOGIN_PATH, Some(&body), None).await?;
        if !login.is_success() {
            warn!("Login rejected for {}: {}", self.username, login.message());
            return Err(ApiError::AuthFailed(login.message()));
        }
        let ticket = login.data["ticket"]
            .as_str()
            .ok_or_else(|| ApiError::Parse("Missing ticket in login response".to_string()))?
            .to_string();

        let passport = self
            .send(
                Method::POST,
                PASSPORT_PATH,
                Some(&json!({ "ticket": ticket })),
                None,
            )
            .await?;
        if !passport.is_success() {
            warn!("Passport exchange failed for {}: {}", self.username, passport.message());
            return Err(ApiError::AuthFailed(passport.message()));
        }
        let token = passport.data["token"]
            .as_str()
            .ok_or_else(|| ApiError::Parse("Missing token in passport response".to_string()))?
            .to_string();

        *self.token.write() = Some(token.clone());
        info!("User {} logged in", self.username);
        Ok(token)
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, ApiError> {
        let body = json!({
            "date_from": "",
            "date_to": "",
            "page_index": 1,
            "page_size": INSTANCE_PAGE_SIZE,
            "status": [],
            "charge_type": [],
        });

        let envelope = self
            .authorized(Method::POST, INSTANCE_PATH, Some(&body))
            .await?;
        let mut data = Self::data_of(envelope)?;
        let list = data
            .get_mut("list")
            .map(Value::take)
            .unwrap_or(Value::Array(Vec::new()));

        serde_json::from_value(list).map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn power_on(&self, uuid: &str, cpu_only: bool) -> Result<bool, ApiError> {
        let mut body = json!({ "instance_uuid": uuid });
        if cpu_only {
            body["restart_type"] = json!("cpu");
        }

        let envelope = self
            .authorized(Method::POST, POWER_ON_PATH, Some(&body))
            .await?;
        if !envelope.is_success() {
            debug!("Power on {} refused: {} {}", uuid, envelope.code, envelope.message());
        }
        Ok(envelope.is_success())
    }

    async fn power_off(&self, uuid: &str) -> Result<bool, ApiError> {
        let body = json!({ "instance_uuid": uuid });
        let envelope = self
            .authorized(Method::POST, POWER_OFF_PATH, Some(&body))
            .await?;
        if !envelope.is_success() {
            debug!("Power off {} refused: {} {}", uuid, envelope.code, envelope.message());
        }
        Ok(envelope.is_success())
    }

    async fn balance(&self) -> Result<f64, ApiError> {
        let envelope = self.authorized(Method::GET, BALANCE_PATH, None).await?;
        let data = Self::data_of(envelope)?;
        let assets = data["assets"]
            .as_f64()
            .ok_or_else(|| ApiError::Parse("Missing assets in wallet response".to_string()))?;
        Ok(assets / 100.0)
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9"));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json;charset=UTF-8"),
    );
    headers.insert("appversion", HeaderValue::from_static(APP_VERSION));
    headers
}

/// Creates an [`AutoDlClient`] per stored credential pair.
#[derive(Debug, Clone)]
pub struct AutoDlConnector {
    base_url: String,
    timeout: Duration,
}

impl AutoDlConnector {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }
}

impl Default for AutoDlConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, Duration::from_secs(30))
    }
}

impl ApiConnector for AutoDlConnector {
    fn connect(&self, username: &str, password: &str) -> Arc<dyn ComputeApi> {
        Arc::new(AutoDlClient::new(
            &self.base_url,
            username,
            password,
            self.timeout,
        ))
    }
}
