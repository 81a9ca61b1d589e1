//! Named remote operations with URI templating, retry and a response cache
//! kept in the application model.

use std::{fmt, rc::Rc, str::FromStr};

use chrono::Utc;
use messaging::{model::is_truthy, AppModel};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use shared::error::{ErrorCode, FrameworkError, FrameworkResult};
use tracing::{debug, warn};

pub mod locator;

pub use locator::ServiceLocator;

const PLACEHOLDER: &str = r"\$\{\s*([A-Za-z0-9_.\-]+)\s*\}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Method implied by a service name: `add*` posts, `update*` puts and
    /// `delete*` deletes. Everything else is a GET.
    pub fn infer(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("add") {
            Self::Post
        } else if lower.starts_with("update") {
            Self::Put
        } else if lower.starts_with("delete") {
            Self::Delete
        } else {
            Self::Get
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = FrameworkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            _ => Err(FrameworkError::configuration(
                ErrorCode::WrongArgumentType,
                "Service::set_options",
                "method must be one of \"GET\", \"POST\", \"PUT\", or \"DELETE\"",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Json,
    Text,
}

/// Caller-supplied overrides. Unset fields keep the defaults derived from
/// the service name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOptions {
    pub format: Option<Format>,
    pub method: Option<String>,
    pub cache: Option<bool>,
    pub cache_expiry: Option<u64>,
    pub retry: Option<u32>,
}

impl ServiceOptions {
    pub fn method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache_expiry(mut self, seconds: u64) -> Self {
        self.cache_expiry = Some(seconds);
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    pub format: Format,
    pub method: Method,
    pub cache: bool,
    /// Seconds; zero keeps cached responses until the service is rebuilt.
    pub cache_expiry: u64,
    pub retry: u32,
}

impl ServiceConfig {
    fn for_name(name: &str, options: &ServiceOptions) -> FrameworkResult<Self> {
        let method = match &options.method {
            Some(method) => method.parse()?,
            None => Method::infer(name),
        };
        let mutating = method != Method::Get;
        Ok(Self {
            format: options.format.unwrap_or(Format::Json),
            method,
            cache: options.cache.unwrap_or(!mutating),
            cache_expiry: options.cache_expiry.unwrap_or(0),
            retry: options.retry.unwrap_or(if mutating { 0 } else { 1 }),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub format: Format,
    pub params: Map<String, Value>,
    /// Set for uncached GETs so intermediaries do not answer from cache.
    pub prevent_cache: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportOutcome {
    Success(Value),
    Failure { status: u16, body: Value },
}

/// Wire collaborator performing the actual request.
pub trait Transport {
    fn send(&self, request: &TransportRequest) -> TransportOutcome;
}

/// Receiver of a service result.
pub trait ServiceCaller {
    fn on_response(&self, data: &Value, params: &Map<String, Value>) -> FrameworkResult<()>;

    fn on_error(&self, errors: &[Value]) -> FrameworkResult<()>;
}

pub struct Service {
    name: String,
    uri: String,
    config: ServiceConfig,
    model: AppModel,
    transport: Rc<dyn Transport>,
    placeholder: Regex,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("uri", &self.uri)
            .field("config", &self.config)
            .finish()
    }
}

fn require(operation: &str, argument: &str, value: &str) -> FrameworkResult<()> {
    if value.is_empty() {
        return Err(FrameworkError::missing_argument(operation, argument));
    }
    Ok(())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Absolute expiry in milliseconds, `seconds` from now. Saturates instead of
/// overflowing for very long lifetimes.
fn expiry_after(seconds: u64) -> i64 {
    i64::try_from(seconds)
        .ok()
        .and_then(|seconds| seconds.checked_mul(1000))
        .map_or(i64::MAX, |millis| now_millis().saturating_add(millis))
}

impl Service {
    pub fn new(
        model: AppModel,
        transport: Rc<dyn Transport>,
        name: &str,
        uri: &str,
        options: Option<ServiceOptions>,
    ) -> FrameworkResult<Self> {
        require("Service::new", "name", name)?;
        require("Service::new", "uri", uri)?;
        let config = ServiceConfig::for_name(name, &options.unwrap_or_default())?;
        let placeholder = Regex::new(PLACEHOLDER).map_err(|err| {
            FrameworkError::configuration(ErrorCode::InvalidType, "Service::new", err.to_string())
        })?;

        let service = Self {
            name: name.to_string(),
            uri: uri.to_string(),
            config,
            model,
            transport,
            placeholder,
        };
        service.expire_cache(name)?;
        Ok(service)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Applies overrides on top of the current configuration.
    pub fn set_options(&mut self, options: &ServiceOptions) -> FrameworkResult<()> {
        if let Some(method) = &options.method {
            self.config.method = method.parse()?;
        }
        if let Some(format) = options.format {
            self.config.format = format;
        }
        if let Some(cache) = options.cache {
            self.config.cache = cache;
        }
        if let Some(expiry) = options.cache_expiry {
            self.config.cache_expiry = expiry;
        }
        if let Some(retry) = options.retry {
            self.config.retry = retry;
        }
        Ok(())
    }

    /// Fills `${key}` placeholders from `params`; unknown keys render empty.
    pub fn expand_uri(&self, params: &Map<String, Value>) -> String {
        self.placeholder
            .replace_all(&self.uri, |caps: &regex::Captures<'_>| {
                params.get(&caps[1]).map(value_text).unwrap_or_default()
            })
            .into_owned()
    }

    /// Model key holding the cached response for `params`.
    pub fn cache_key(&self, params: &Map<String, Value>) -> String {
        let mut key = self.name.clone();
        for (name, value) in params {
            key.push('_');
            key.push_str(name);
            key.push('_');
            key.push_str(&value_text(value));
        }
        key
    }

    pub fn invoke(&self, params: &Map<String, Value>, caller: &dyn ServiceCaller) -> FrameworkResult<()> {
        let cache_key = self.cache_key(params);
        if self.config.cache {
            if let Some(data) = self.cached(&cache_key)? {
                debug!(service = %self.name, key = %cache_key, "answering from cache");
                return caller.on_response(&data, params);
            }
        }

        let request = TransportRequest {
            method: self.config.method,
            url: self.expand_uri(params),
            format: self.config.format,
            params: params.clone(),
            prevent_cache: !self.config.cache && self.config.method == Method::Get,
        };

        let mut tried: u32 = 0;
        loop {
            debug!(service = %self.name, url = %request.url, method = %request.method, "sending");
            let outcome = self.transport.send(&request);
            tried += 1;
            match outcome {
                TransportOutcome::Success(body) => {
                    return self.handle_success(body, &cache_key, params, caller);
                }
                TransportOutcome::Failure { status, body } => {
                    if self.config.retry >= tried {
                        warn!(service = %self.name, status, tried, "retrying");
                        continue;
                    }
                    return caller.on_error(&collect_errors(body, Some(status)));
                }
            }
        }
    }

    fn handle_success(
        &self,
        body: Value,
        cache_key: &str,
        params: &Map<String, Value>,
        caller: &dyn ServiceCaller,
    ) -> FrameworkResult<()> {
        let data = match self.config.format {
            Format::Text => body,
            Format::Json => {
                let data = match body {
                    Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            return caller.on_error(&collect_errors(Value::String(err.to_string()), None))
                        }
                    },
                    other => other,
                };
                let failed = data.get("error").is_some_and(is_truthy)
                    || data.get("errors").is_some_and(is_truthy);
                if failed {
                    return caller.on_error(&collect_errors(data, None));
                }
                data
            }
        };

        if self.config.cache {
            self.store(cache_key, &data)?;
        }
        caller.on_response(&data, params)
    }

    fn store(&self, key: &str, data: &Value) -> FrameworkResult<()> {
        let expiry_time = match self.config.cache_expiry {
            0 => 0,
            seconds => expiry_after(seconds),
        };
        self.model
            .set(key, &json!({"data": data, "expiryTime": expiry_time}))
    }

    fn cached(&self, key: &str) -> FrameworkResult<Option<Value>> {
        if !self.model.contains(key) {
            return Ok(None);
        }
        let entry = self.model.get(key);
        let expiry = entry.get("expiryTime").and_then(Value::as_i64).unwrap_or(0);
        if expiry > 0 && now_millis() > expiry {
            self.expire_cache(key)?;
            return Ok(None);
        }
        Ok(entry.get("data").cloned())
    }

    fn expire_cache(&self, key: &str) -> FrameworkResult<()> {
        self.model.remove(key)
    }
}

/// Normalizes a failure body into the error list handed to `on_error`.
pub fn collect_errors(body: Value, status: Option<u16>) -> Vec<Value> {
    let mut body = match body {
        Value::String(message) => json!({ "message": message }),
        Value::Object(map) => Value::Object(map),
        Value::Null => json!({}),
        other => json!({ "message": other.to_string() }),
    };

    let mut errors = Vec::new();
    if let Some(status) = status {
        body["code"] = json!(status);
        errors.push(body.clone());
    }
    if let Some(name) = body.get("name").filter(|n| is_truthy(n)).cloned() {
        body["code"] = name;
        errors.push(body.clone());
    }
    if let Some(list) = body.get("errors").filter(|e| is_truthy(e)) {
        errors = match list {
            Value::Array(items) => items.clone(),
            single => vec![single.clone()],
        };
    }
    if let Some(error) = body.get("error").filter(|e| is_truthy(e)) {
        errors.push(error.clone());
    }
    if errors.is_empty() {
        errors.push(body);
    }
    errors
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
