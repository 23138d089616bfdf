//! HTTP client side of the miner REST API.
//!
//! [`DeviceApi`] is the seam between the engine and the network: the
//! scanner, registry, and action dispatcher only ever talk to a device
//! through it, so tests substitute a scripted implementation.

use std::net::IpAddr;

use async_trait::async_trait;
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};

/// Why a single request to a device failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("timed out")]
    Timeout,

    /// Nothing accepted the connection.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// A connection was made but no usable HTTP exchange completed.
    #[error("connection failed: {0}")]
    Opaque(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("unexpected response: {0}")]
    Decode(String),

    /// The device answered, but not as a miner.
    #[error("not a miner")]
    NotAMiner,
}

impl ProbeError {
    /// Whether the failure looks like a protected miner endpoint rather
    /// than an absent one.
    pub fn is_auth_shaped(&self) -> bool {
        matches!(self, ProbeError::Status(401) | ProbeError::Opaque(_))
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProbeError::Timeout
        } else if e.is_connect() {
            ProbeError::Unreachable(e.to_string())
        } else if let Some(status) = e.status() {
            ProbeError::Status(status.as_u16())
        } else if e.is_decode() {
            ProbeError::Decode(e.to_string())
        } else {
            ProbeError::Opaque(e.to_string())
        }
    }
}

/// One-shot commands a device accepts on `POST /api/system/{action}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceAction {
    Restart,
    Identify,
}

#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// `GET /api/system/info`: the telemetry snapshot.
    async fn system_info(&self, address: &str) -> Result<Value, ProbeError>;

    /// `GET /api/system/asic`: static ASIC identity.
    async fn asic_info(&self, address: &str) -> Result<Value, ProbeError>;

    /// `POST /api/system/{action}`; returns the device's status text.
    async fn post_action(&self, address: &str, action: DeviceAction)
    -> Result<String, ProbeError>;

    /// Resolve a hostname to the IPv4 address used to dial it.
    async fn resolve(&self, host: &str) -> Result<String, ProbeError> {
        let addrs = tokio::net::lookup_host((host, 80))
            .await
            .map_err(|e| ProbeError::Unreachable(e.to_string()))?;
        addrs
            .map(|a| a.ip())
            .find(IpAddr::is_ipv4)
            .map(|ip| ip.to_string())
            .ok_or_else(|| ProbeError::Unreachable(format!("{host} has no IPv4 address")))
    }
}

/// [`DeviceApi`] over plain HTTP with reqwest.
///
/// No client-side timeout is set; callers bound each call themselves so a
/// timeout can be told apart from other failures.
#[derive(Clone, Default)]
pub struct HttpDeviceApi {
    client: reqwest::Client,
}

impl HttpDeviceApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn url(address: &str, path: &str) -> String {
        format!("http://{address}{path}")
    }

    async fn get_json(&self, address: &str, path: &str) -> Result<Value, ProbeError> {
        let response = self
            .client
            .get(Self::url(address, path))
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ProbeError::Decode(e.to_string()))
    }
}

#[async_trait]
impl DeviceApi for HttpDeviceApi {
    async fn system_info(&self, address: &str) -> Result<Value, ProbeError> {
        self.get_json(address, "/api/system/info").await
    }

    async fn asic_info(&self, address: &str) -> Result<Value, ProbeError> {
        self.get_json(address, "/api/system/asic").await
    }

    async fn post_action(
        &self,
        address: &str,
        action: DeviceAction,
    ) -> Result<String, ProbeError> {
        let path = format!("/api/system/{}", action.as_ref());
        let response = self
            .client
            .post(Self::url(address, &path))
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        Ok(response.text().await?)
    }
}

/// Scripted [`DeviceApi`] for tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    /// How a scripted device answers.
    #[derive(Clone)]
    pub enum Reply {
        Json(Value),
        Fail(ProbeError),
        /// Never answers within any timeout the engine uses.
        Hang,
    }

    #[derive(Default)]
    pub struct MockApi {
        pub info: Mutex<HashMap<String, Reply>>,
        pub asic: Mutex<HashMap<String, Reply>>,
        pub actions: Mutex<HashMap<String, Reply>>,
        pub hosts: Mutex<HashMap<String, String>>,
        /// Simulated round-trip time for every call.
        pub latency: Duration,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        pub info_calls: AtomicUsize,
        pub asic_calls: AtomicUsize,
    }

    impl MockApi {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn with_latency(latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                latency,
                ..Default::default()
            })
        }

        pub fn set_info(&self, address: &str, reply: Reply) {
            self.info.lock().insert(address.to_string(), reply);
        }

        pub fn set_asic(&self, address: &str, reply: Reply) {
            self.asic.lock().insert(address.to_string(), reply);
        }

        pub fn set_action(&self, address: &str, reply: Reply) {
            self.actions.lock().insert(address.to_string(), reply);
        }

        /// Script a miner that answers both endpoints.
        pub fn add_miner(&self, address: &str, info: Value) {
            self.set_info(address, Reply::Json(info));
            self.set_asic(
                address,
                Reply::Json(serde_json::json!({"ASICModel": "BM1370", "asicCount": 1})),
            );
        }

        async fn answer(&self, reply: Option<Reply>) -> Result<Value, ProbeError> {
            tokio::time::sleep(self.latency).await;
            match reply {
                Some(Reply::Json(v)) => Ok(v),
                Some(Reply::Fail(e)) => Err(e),
                Some(Reply::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProbeError::Timeout)
                }
                None => Err(ProbeError::Unreachable("no route to host".into())),
            }
        }
    }

    #[async_trait]
    impl DeviceApi for MockApi {
        async fn system_info(&self, address: &str) -> Result<Value, ProbeError> {
            self.info_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let reply = self.info.lock().get(address).cloned();
            let result = self.answer(reply).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn asic_info(&self, address: &str) -> Result<Value, ProbeError> {
            self.asic_calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.asic.lock().get(address).cloned();
            self.answer(reply).await
        }

        async fn post_action(
            &self,
            address: &str,
            _action: DeviceAction,
        ) -> Result<String, ProbeError> {
            let reply = self.actions.lock().get(address).cloned();
            match self.answer(reply).await? {
                Value::String(s) => Ok(s),
                other => Ok(other.to_string()),
            }
        }

        async fn resolve(&self, host: &str) -> Result<String, ProbeError> {
            self.hosts
                .lock()
                .get(host)
                .cloned()
                .ok_or_else(|| ProbeError::Unreachable(format!("unknown host {host}")))
        }
    }
}
