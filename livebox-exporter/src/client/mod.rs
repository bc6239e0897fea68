//! Access to the device API.
//!
//! Pollers only see [`DeviceApi`]: execute a named remote operation and get
//! back its `status` payload. [`request_as`] adds tick cancellation and typed
//! decoding on top of it.

pub mod livebox;

use crate::error::ClientError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Display;
use std::future::Future;
use tokio_util::sync::CancellationToken;

pub use livebox::{LiveboxClient, LiveboxConfig};

/// A remote operation: `method` of `service` with named parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub service: String,
    pub method: String,
    pub parameters: Map<String, Value>,
}

impl Request {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            parameters: Map::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.method)
    }
}

/// Capability to execute remote operations on the device.
pub trait DeviceApi: Send + Sync + 'static {
    /// Executes `request` and returns the `status` payload of the reply.
    fn request(
        &self,
        request: &Request,
    ) -> impl Future<Output = Result<Value, ClientError>> + Send;
}

/// Executes `request`, aborting when `cancel` fires, and decodes the payload.
pub async fn request_as<A, T>(
    api: &A,
    cancel: &CancellationToken,
    request: Request,
) -> Result<T, ClientError>
where
    A: DeviceApi,
    T: DeserializeOwned,
{
    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ClientError::Cancelled),
        status = api.request(&request) => status?,
    };

    serde_json::from_value(status).map_err(|e| ClientError::decode(request.to_string(), e))
}

#[cfg(test)]
pub mod fake {
    //! Scripted device used by poller tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    enum Reply {
        Ok(Value),
        Err(fn() -> ClientError),
    }

    /// Replies are looked up by `"service/method"`. The last reply queued for
    /// a key is repeated once the queue is drained.
    #[derive(Default)]
    pub struct FakeDevice {
        replies: Mutex<HashMap<String, Vec<Reply>>>,
        delays: Mutex<HashMap<String, Duration>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeDevice {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(&self, key: &str, status: Value) -> &Self {
            self.replies
                .lock()
                .entry(key.to_string())
                .or_default()
                .push(Reply::Ok(status));
            self
        }

        pub fn fail(&self, key: &str, err: fn() -> ClientError) -> &Self {
            self.replies
                .lock()
                .entry(key.to_string())
                .or_default()
                .push(Reply::Err(err));
            self
        }

        pub fn delay(&self, key: &str, delay: Duration) -> &Self {
            self.delays.lock().insert(key.to_string(), delay);
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        pub fn call_count(&self, key: &str) -> usize {
            self.calls.lock().iter().filter(|c| *c == key).count()
        }

        fn next(&self, key: &str) -> Result<Value, ClientError> {
            let mut replies = self.replies.lock();
            let queue = match replies.get_mut(key) {
                Some(queue) if !queue.is_empty() => queue,
                _ => {
                    return Err(ClientError::Device {
                        service: key.to_string(),
                        method: String::new(),
                        description: "no scripted reply".to_string(),
                    })
                }
            };

            let reply = if queue.len() > 1 {
                queue.remove(0)
            } else {
                match &queue[0] {
                    Reply::Ok(v) => Reply::Ok(v.clone()),
                    Reply::Err(f) => Reply::Err(*f),
                }
            };

            match reply {
                Reply::Ok(v) => Ok(v),
                Reply::Err(f) => Err(f()),
            }
        }
    }

    impl DeviceApi for FakeDevice {
        async fn request(&self, request: &Request) -> Result<Value, ClientError> {
            let key = request.to_string();
            self.calls.lock().push(key.clone());

            let delay = self.delays.lock().get(&key).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            self.next(&key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeDevice;
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Debug, Deserialize)]
    struct Stats {
        #[serde(rename = "BytesSent")]
        bytes_sent: u64,
    }

    #[test]
    fn test_request_serialization() {
        let req = Request::new("NeMo.Intf.data", "getMIBs").param("traverse", "all");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "service": "NeMo.Intf.data",
                "method": "getMIBs",
                "parameters": {"traverse": "all"}
            })
        );
        assert_eq!(req.to_string(), "NeMo.Intf.data/getMIBs");
    }

    #[tokio::test]
    async fn test_call_decodes_payload() {
        let device = FakeDevice::new();
        device.reply("HomeLan/getWANCounters", json!({"BytesSent": 42, "BytesReceived": 1}));

        let stats: Stats = request_as(
            &device,
            &CancellationToken::new(),
            Request::new("HomeLan", "getWANCounters"),
        )
        .await
        .unwrap();
        assert_eq!(stats.bytes_sent, 42);
    }

    #[tokio::test]
    async fn test_call_reports_shape_mismatch_as_decode_error() {
        let device = FakeDevice::new();
        device.reply("HomeLan/getWANCounters", json!({"BytesSent": "lots"}));

        let err = request_as::<_, Stats>(
            &device,
            &CancellationToken::new(),
            Request::new("HomeLan", "getWANCounters"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_call_observes_cancellation() {
        let device = FakeDevice::new();
        device
            .reply("DeviceInfo/get", json!({"UpTime": 1}))
            .delay("DeviceInfo/get", Duration::from_secs(60));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = request_as::<_, Value>(&device, &cancel, Request::new("DeviceInfo", "get"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
    }
}
