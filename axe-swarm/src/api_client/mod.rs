//! HTTP client for the swarm daemon's API.

pub mod types;

use anyhow::{Context, Result, bail};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::action::ActionOutcome;
use crate::aggregate::Family;
use crate::device::Device;
use crate::device_api::DeviceAction;
use types::{AddDeviceRequest, ErrorResponse, ScanResponse, SettingsPatch, SwarmState, TotalsState};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7786";

pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/api/v0{}", self.base_url, path))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("daemon unreachable")?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response.json().await.context("malformed response");
        }

        match response.json::<ErrorResponse>().await {
            Ok(body) => bail!("{} ({})", body.error, status),
            Err(_) => bail!("request failed: {}", status),
        }
    }

    pub async fn get_swarm(&self, filter: Option<&str>) -> Result<SwarmState> {
        let mut request = self.request(Method::GET, "/swarm");
        if let Some(filter) = filter {
            request = request.query(&[("filter", filter)]);
        }
        self.send(request).await
    }

    pub async fn get_totals(&self) -> Result<TotalsState> {
        self.send(self.request(Method::GET, "/swarm/totals")).await
    }

    pub async fn get_families(&self) -> Result<Vec<Family>> {
        self.send(self.request(Method::GET, "/swarm/families")).await
    }

    pub async fn scan(&self) -> Result<ScanResponse> {
        self.send(self.request(Method::POST, "/swarm/scan")).await
    }

    pub async fn refresh(&self) -> Result<ScanResponse> {
        self.send(self.request(Method::POST, "/swarm/refresh")).await
    }

    pub async fn add_device(&self, address: &str) -> Result<Device> {
        let body = AddDeviceRequest {
            address: address.to_string(),
        };
        self.send(self.request(Method::POST, "/swarm/devices").json(&body))
            .await
    }

    pub async fn remove_device(&self, address: &str) -> Result<Device> {
        self.send(self.request(Method::DELETE, &format!("/swarm/devices/{address}")))
            .await
    }

    pub async fn device_action(&self, address: &str, action: DeviceAction) -> Result<ActionOutcome> {
        let path = format!("/swarm/devices/{address}/{action}");
        self.send(self.request(Method::POST, &path)).await
    }

    pub async fn patch_settings(&self, patch: &SettingsPatch) -> Result<SwarmState> {
        self.send(self.request(Method::PATCH, "/swarm/settings").json(patch))
            .await
    }
}
