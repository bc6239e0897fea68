use super::{DeviceApi, Request};
use crate::error::ClientError;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_ADDRESS: &str = "http://192.168.1.1";
pub const DEFAULT_USERNAME: &str = "admin";

const WS_CONTENT_TYPE: &str = "application/x-sah-ws-4-call+json";
const PERMISSION_DENIED: &str = "Permission denied";

/// Connection settings for a Livebox.
#[derive(Debug, Clone)]
pub struct LiveboxConfig {
    pub address: String,
    pub username: String,
    pub password: String,
    /// Extra PEM bundle trusted in addition to the system roots.
    pub ca_cert: Option<PathBuf>,
    pub request_timeout: Duration,
}

/// Livebox sysbus client.
///
/// Every call is a POST on `/ws`. A session context is created lazily with
/// the admin password and renewed once when the device answers
/// "Permission denied".
pub struct LiveboxClient {
    http: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
    context: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<ReplyError>,
}

#[derive(Debug, Deserialize)]
struct ReplyError {
    #[serde(default)]
    description: String,
    #[serde(default)]
    info: String,
}

impl ReplyError {
    fn is_permission_denied(&self) -> bool {
        self.description == PERMISSION_DENIED
    }
}

impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.info.is_empty() {
            write!(f, "{}", self.description)
        } else {
            write!(f, "{} ({})", self.description, self.info)
        }
    }
}

enum Outcome {
    Status(Value),
    PermissionDenied,
}

impl LiveboxClient {
    pub fn new(config: LiveboxConfig) -> Result<Self, anyhow::Error> {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout);

        if let Some(path) = &config.ca_cert {
            let pem = std::fs::read(path).map_err(|e| {
                anyhow::anyhow!("Failed to read Livebox CA cert {}: {}", path.display(), e)
            })?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem)?;
            if certs.is_empty() {
                return Err(anyhow::anyhow!("No Livebox CA cert was successfully added"));
            }
            log::info!("Loaded {} CA certificate(s) from {}", certs.len(), path.display());
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        Ok(Self {
            http: builder.build()?,
            endpoint: format!("{}/ws", config.address.trim_end_matches('/')),
            username: config.username,
            password: config.password,
            context: Mutex::new(None),
        })
    }

    async fn post(
        &self,
        body: &Value,
        authorization: &str,
        context: Option<&str>,
    ) -> Result<Reply, ClientError> {
        let mut req = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, HeaderValue::from_static(WS_CONTENT_TYPE))
            .header(AUTHORIZATION, authorization)
            .json(body);
        if let Some(ctx) = context {
            req = req.header("X-Context", ctx);
        }

        let response = req.send().await.map_err(map_reqwest_error)?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(Reply {
                status: None,
                data: None,
                errors: vec![ReplyError {
                    description: PERMISSION_DENIED.to_string(),
                    info: format!("HTTP {}", status),
                }],
            });
        }
        if !status.is_success() {
            return Err(ClientError::Transport(format!(
                "unexpected HTTP status {} from {}",
                status, self.endpoint
            )));
        }

        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::decode("reply envelope", e))
    }

    async fn login(&self) -> Result<String, ClientError> {
        let body = json!({
            "service": "sah.Device.Information",
            "method": "createContext",
            "parameters": {
                "applicationName": "webui",
                "username": self.username,
                "password": self.password,
            }
        });

        let reply = self.post(&body, "X-Sah-Login", None).await?;
        if let Some(err) = reply.errors.first() {
            return Err(ClientError::Auth(err.to_string()));
        }

        let context = reply
            .data
            .as_ref()
            .and_then(|d| d.get("contextID"))
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Auth("no session context in login reply".to_string()))?;

        log::debug!("Opened a new Livebox session");
        Ok(context.to_string())
    }

    async fn session(&self) -> Result<String, ClientError> {
        let mut context = self.context.lock().await;
        if let Some(ctx) = context.as_ref() {
            return Ok(ctx.clone());
        }

        let ctx = self.login().await?;
        *context = Some(ctx.clone());
        Ok(ctx)
    }

    async fn invalidate(&self, stale: &str) {
        let mut context = self.context.lock().await;
        if context.as_deref() == Some(stale) {
            *context = None;
        }
    }

    async fn execute(&self, request: &Request, ctx: &str) -> Result<Outcome, ClientError> {
        let body = serde_json::to_value(request)
            .map_err(|e| ClientError::decode(request.to_string(), e))?;
        let reply = self.post(&body, &format!("X-Sah {}", ctx), Some(ctx)).await?;

        if reply.errors.iter().any(ReplyError::is_permission_denied) {
            return Ok(Outcome::PermissionDenied);
        }
        if let Some(err) = reply.errors.first() {
            return Err(ClientError::Device {
                service: request.service.clone(),
                method: request.method.clone(),
                description: err.to_string(),
            });
        }

        reply
            .status
            .map(Outcome::Status)
            .ok_or_else(|| ClientError::decode(request.to_string(), "missing status"))
    }
}

impl DeviceApi for LiveboxClient {
    async fn request(&self, request: &Request) -> Result<Value, ClientError> {
        let ctx = self.session().await?;
        if let Outcome::Status(status) = self.execute(request, &ctx).await? {
            return Ok(status);
        }

        // The session expired (device reboot, idle timeout): log in again once.
        log::debug!("Livebox session rejected for {}, renewing", request);
        self.invalidate(&ctx).await;
        let ctx = self.session().await?;
        match self.execute(request, &ctx).await? {
            Outcome::Status(status) => Ok(status),
            // The login itself succeeded, so this is not a credential problem.
            Outcome::PermissionDenied => Err(ClientError::Device {
                service: request.service.clone(),
                method: request.method.clone(),
                description: PERMISSION_DENIED.to_string(),
            }),
        }
    }
}

/// Maps a reqwest failure to an error kind. A rustls verification error
/// anywhere in the source chain is a certificate problem.
fn map_reqwest_error(err: reqwest::Error) -> ClientError {
    let mut chain = Vec::new();
    let mut source: Option<&dyn std::error::Error> = Some(&err);
    while let Some(e) = source {
        chain.push(e.to_string());
        source = e.source();
    }
    let message = chain.join(": ");

    if find_tls_error(&err).is_some_and(is_certificate_error) {
        ClientError::Certificate(message)
    } else {
        ClientError::Transport(message)
    }
}

/// Walks the source chain for a rustls error. tokio-rustls reports it
/// wrapped in an `io::Error`, whose `source()` skips the wrapped error.
fn find_tls_error<'a>(error: &'a (dyn std::error::Error + 'static)) -> Option<&'a rustls::Error> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);

    while let Some(candidate) = current {
        if let Some(tls) = candidate.downcast_ref::<rustls::Error>() {
            return Some(tls);
        }
        if let Some(tls) = candidate
            .downcast_ref::<io::Error>()
            .and_then(io::Error::get_ref)
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        {
            return Some(tls);
        }
        current = candidate.source();
    }

    None
}

fn is_certificate_error(error: &rustls::Error) -> bool {
    matches!(
        error,
        rustls::Error::InvalidCertificate(_)
            | rustls::Error::NoCertificatesPresented
            | rustls::Error::UnsupportedNameType
            | rustls::Error::InvalidCertRevocationList(_)
    )
}
