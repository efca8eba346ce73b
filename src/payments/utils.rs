use crate::payments::error::{GatewayError, GatewayResult};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Credentials attached to a gateway request.
#[derive(Debug, Clone, Copy)]
pub enum RequestAuth<'a> {
    None,
    Basic { username: &'a str, password: &'a str },
}

#[derive(Clone)]
pub struct PayoutHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl PayoutHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> GatewayResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    /// Send a JSON request. Every attempt carries identical headers, so a
    /// retried payout reuses its idempotency key.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: RequestAuth<'_>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> GatewayResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            if let RequestAuth::Basic { username, password } = auth {
                request = request.basic_auth(username, Some(password));
            }
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request
                .send()
                .await
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("gateway request failed: {}", e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            GatewayError::InvalidResponse {
                                message: format!("invalid gateway JSON response: {}", e),
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(GatewayError::RateLimitError {
                            message: "gateway rate limit exceeded".to_string(),
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "gateway server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    let (code, description) = parse_error_body(&text);
                    return Err(GatewayError::RequestError {
                        status: status.as_u16(),
                        code,
                        description: description.unwrap_or_else(|| format!("HTTP {}", status)),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::NetworkError {
            message: "gateway request failed".to_string(),
        }))
    }
}

/// Pull `error.code` and `error.description` out of a gateway error body.
fn parse_error_body(text: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<JsonValue>(text) else {
        let trimmed = text.trim();
        return (None, (!trimmed.is_empty()).then(|| trimmed.to_string()));
    };
    let error = &value["error"];
    let code = error["code"].as_str().map(str::to_string);
    let description = error["description"]
        .as_str()
        .or_else(|| value["message"].as_str())
        .map(str::to_string);
    (code, description)
}

pub fn sign_hmac_sha256_hex(payload: &[u8], secret: &str) -> Option<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    match sign_hmac_sha256_hex(payload, secret) {
        Some(computed) => secure_eq(computed.as_bytes(), signature.trim().as_bytes()),
        None => false,
    }
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

/// Major-unit amount to the gateway's minor units, truncating sub-paise.
/// `None` when the amount does not fit.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    amount.checked_mul(Decimal::ONE_HUNDRED)?.floor().to_i64()
}
