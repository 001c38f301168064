//! HTTP exchange with the simulator.
//!
//! Both calls are attempted exactly once and never fail loudly: anything
//! other than a 200 is logged and folded into `None` / `false`. Callers that
//! need certainty follow a POST with a GET.

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use tracing::{debug, warn};

const APPLICATION_JSON: &str = "application/json";

#[derive(Debug, Clone, Default)]
pub struct Transport {
    client: reqwest::Client,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    /// GET `url` and decode the JSON body.
    ///
    /// Returns `None` on a non-200 status, a connection error or a body that
    /// is not JSON.
    pub async fn get(&self, url: &str) -> Option<Value> {
        debug!(url, "GET");
        let response = match self
            .client
            .get(url)
            .header(ACCEPT, APPLICATION_JSON)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(url, error = %error, "GET failed");
                return None;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable>".into());
            warn!(url, %status, body = %body, "GET failed");
            return None;
        }

        match response.json::<Value>().await {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(url, error = %error, "GET returned a body that is not JSON");
                None
            }
        }
    }

    /// GET `url` and decode the body into `T`, `None` if either step fails.
    pub async fn get_as<T: DeserializeOwned>(&self, url: &str) -> Option<T> {
        let value = self.get(url).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                warn!(url, error = %error, "Unexpected response shape");
                None
            }
        }
    }

    /// POST `body` as JSON to `url`. `true` iff the simulator answers 200.
    pub async fn post<B>(&self, url: &str, body: &B) -> bool
    where
        B: Serialize + Debug + ?Sized,
    {
        debug!(url, body = ?body, "POST");
        match self
            .client
            .post(url)
            .header(ACCEPT, APPLICATION_JSON)
            .header(CONTENT_TYPE, APPLICATION_JSON)
            .json(body)
            .send()
            .await
        {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                let status = response.status();
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<unreadable>".into());
                warn!(url, body = ?body, %status, response = %text, "POST rejected");
                false
            }
            Err(error) => {
                warn!(url, body = ?body, error = %error, "POST failed");
                false
            }
        }
    }
}
