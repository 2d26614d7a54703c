use crate::payments::error::{PaymentError, PaymentResult};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sha2::{Sha256, Sha512};
use std::time::Duration;
use tracing::warn;

/// Status and body of one provider HTTP exchange. The body is kept as JSON
/// when it parses, otherwise as a JSON string holding the raw text.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: JsonValue,
}

impl ProviderResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

#[derive(Clone, Copy)]
pub enum HttpAuth<'a> {
    None,
    Bearer(&'a str),
    Basic { username: &'a str, password: &'a str },
}

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                PaymentError::unavailable(provider, format!("failed to initialize HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            provider,
            timeout,
            max_retries,
        })
    }

    /// Sends one request and reports whatever came back. Only a missing
    /// response (connect failure, timeout) is an error.
    pub async fn send_once(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: HttpAuth<'_>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<ProviderResponse> {
        let mut request = self.client.request(method, url).timeout(self.timeout);

        request = match auth {
            HttpAuth::None => request,
            HttpAuth::Bearer(token) => request.bearer_auth(token),
            HttpAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
        };
        for (k, v) in additional_headers {
            request = request.header(*k, *v);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|e| {
            PaymentError::unavailable(self.provider, format!("provider request failed: {}", e))
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<JsonValue>(&text).unwrap_or(JsonValue::String(text));

        Ok(ProviderResponse { status, body })
    }

    /// Form-encoded POST, used for OAuth token exchanges.
    pub async fn post_form(
        &self,
        url: &str,
        auth: HttpAuth<'_>,
        form: &[(&str, &str)],
    ) -> PaymentResult<ProviderResponse> {
        let mut request = self.client.post(url).timeout(self.timeout).form(form);
        if let HttpAuth::Basic { username, password } = auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(|e| {
            PaymentError::unavailable(self.provider, format!("provider request failed: {}", e))
        })?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<JsonValue>(&text).unwrap_or(JsonValue::String(text));

        Ok(ProviderResponse { status, body })
    }

    /// Checkout-side request: retries 429 and 5xx, then maps the final status
    /// onto the payment error taxonomy.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: HttpAuth<'_>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut attempt = 0;
        loop {
            let result = self
                .send_once(method.clone(), url, auth, body, additional_headers)
                .await;

            let retry = match &result {
                Err(_) => true,
                Ok(resp) => resp.status == 429 || resp.is_server_error(),
            };
            if retry && attempt < self.max_retries {
                warn!(
                    provider = self.provider,
                    attempt = attempt + 1,
                    "provider request failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(250 << attempt)).await;
                attempt += 1;
                continue;
            }

            let resp = result?;
            if resp.is_success() {
                return serde_json::from_value::<T>(resp.body).map_err(|e| {
                    PaymentError::unavailable(
                        self.provider,
                        format!("invalid provider JSON response: {}", e),
                    )
                });
            }
            return Err(classify_error_status(self.provider, &resp));
        }
    }
}

pub fn classify_error_status(provider: &str, resp: &ProviderResponse) -> PaymentError {
    match resp.status {
        401 | 403 => PaymentError::AuthenticationError {
            provider: provider.to_string(),
            message: format!("HTTP {}", resp.status),
        },
        429 => PaymentError::RateLimitError {
            message: format!("{} rate limit exceeded", provider),
            retry_after_seconds: None,
        },
        s if s >= 500 => PaymentError::unavailable(provider, format!("HTTP {}: {}", s, resp.body)),
        s => PaymentError::rejected(
            provider,
            format!("HTTP {}: {}", s, resp.body),
            Some(s.to_string()),
        ),
    }
}

pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    type HmacSha256 = Hmac<Sha256>;
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn hmac_sha512_hex(secret: &str, payload: &[u8]) -> String {
    type HmacSha512 = Hmac<Sha512>;
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let computed = hmac_sha512_hex(secret, payload);
    !computed.is_empty()
        && secure_eq(
            computed.as_bytes(),
            signature.trim().to_lowercase().as_bytes(),
        )
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let computed = hmac_sha256_hex(secret, payload);
    !computed.is_empty()
        && secure_eq(
            computed.as_bytes(),
            signature.trim().to_lowercase().as_bytes(),
        )
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Canonical JSON with object keys sorted at every level.
pub fn sorted_json(value: &JsonValue) -> String {
    reorder(value).to_string()
}

fn reorder(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<(&String, &JsonValue)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            JsonValue::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), reorder(v)))
                    .collect(),
            )
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(reorder).collect()),
        other => other.clone(),
    }
}

/// Reads a header as a trimmed string.
pub fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
