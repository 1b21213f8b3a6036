use anyhow::bail;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

use crate::{reconcile::ReconciliationResult, tags::StoredTag};

use super::{backend::AppBackend, errors::AppError};

/// Forwards every operation to a running `rentag daemon`.
pub struct AppRemote {
    remote_addr: String,
    client: reqwest::blocking::Client,
}

impl AppRemote {
    pub fn new(addr: &str) -> AppRemote {
        let remote_addr = addr.strip_suffix("/").unwrap_or(addr).to_string();

        AppRemote {
            remote_addr,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn get(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        log::info!("{}{}", self.remote_addr, url);
        self.client.get(format!("{}{}", self.remote_addr, url))
    }

    fn post(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        log::info!("{}{}", self.remote_addr, url);
        self.client.post(format!("{}{}", self.remote_addr, url))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum WebResponse<T> {
    Error { error: String },
    Data(T),
}

fn handle_response<T>(response: reqwest::blocking::Response) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let text = response.text()?;
    parse_response(&text)
}

fn parse_response<T>(text: &str) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let web_response = serde_json::from_str::<WebResponse<T>>(text).map_err(|err| {
        log::error!("{err}. tried to parse: {text:?}");
        err
    })?;

    match web_response {
        WebResponse::Data(data) => Ok(data),
        WebResponse::Error { error } => {
            bail!(error)
        }
    }
}

impl AppBackend for AppRemote {
    fn reconcile(&self, candidates: Vec<String>) -> Result<ReconciliationResult, AppError> {
        let resp = self
            .post("/api/tags/reconcile")
            .json(&json!({ "tags": candidates }))
            .send()?;

        Ok(handle_response(resp)?)
    }

    fn tags(&self) -> Result<Vec<StoredTag>, AppError> {
        let resp = self.get("/api/tags").send()?;

        Ok(handle_response(resp)?)
    }
}
