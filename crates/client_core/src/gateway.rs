use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Employee, Product, RequestId},
    protocol::{NewRestockRequest, RestockRequest},
};
use tracing::{debug, warn};
use url::Url;

use crate::error::NetworkError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceData {
    pub products: Vec<Product>,
    pub employees: Vec<Employee>,
}

#[async_trait]
pub trait RestockGateway: Send + Sync {
    async fn list_products(&self) -> Result<Vec<Product>, NetworkError>;
    async fn list_employees(&self) -> Result<Vec<Employee>, NetworkError>;
    async fn submit_request(&self, request: &NewRestockRequest) -> Result<(), NetworkError>;
    async fn list_history(&self) -> Result<Vec<RestockRequest>, NetworkError>;
    async fn delete_request(&self, request_id: &RequestId) -> Result<(), NetworkError>;
    /// Destructive: wipes every table and regenerates demo data.
    async fn reset_demo_data(&self) -> Result<(), NetworkError>;

    async fn load_reference_data(&self) -> Result<ReferenceData, NetworkError> {
        let (products, employees) =
            futures::try_join!(self.list_products(), self.list_employees())?;
        Ok(ReferenceData {
            products,
            employees,
        })
    }
}

pub struct HttpGateway {
    http: Client,
    server_url: Url,
}

impl HttpGateway {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, NetworkError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| NetworkError::Transport {
                operation: "build http client",
                source,
            })?;
        Self::with_client(http, server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self, NetworkError> {
        let invalid = |reason: String| NetworkError::InvalidServerUrl {
            url: server_url.to_string(),
            reason,
        };
        let parsed = Url::parse(server_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.cannot_be_a_base() {
            return Err(invalid("expected an http(s) base url".into()));
        }
        Ok(Self {
            http,
            server_url: parsed,
        })
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.server_url.clone();
        // Base-ness was checked in the constructor, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn execute(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, NetworkError> {
        let response = request
            .send()
            .await
            .map_err(|source| NetworkError::Transport { operation, source })?;

        let status = response.status();
        if !status.is_success() {
            warn!(operation, status = status.as_u16(), "restock api call rejected");
            return Err(NetworkError::Status {
                operation,
                status: status.as_u16(),
            });
        }

        debug!(operation, status = status.as_u16(), "restock api call succeeded");
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        segments: &[&str],
    ) -> Result<T, NetworkError> {
        self.execute(operation, self.http.get(self.endpoint(segments)))
            .await?
            .json()
            .await
            .map_err(|source| NetworkError::Decode { operation, source })
    }
}

#[async_trait]
impl RestockGateway for HttpGateway {
    async fn list_products(&self) -> Result<Vec<Product>, NetworkError> {
        self.get_json("list products", &["api", "products"]).await
    }

    async fn list_employees(&self) -> Result<Vec<Employee>, NetworkError> {
        self.get_json("list employees", &["api", "employees"]).await
    }

    async fn submit_request(&self, request: &NewRestockRequest) -> Result<(), NetworkError> {
        self.execute(
            "submit restock request",
            self.http
                .post(self.endpoint(&["api", "restock"]))
                .json(request),
        )
        .await?;
        Ok(())
    }

    async fn list_history(&self) -> Result<Vec<RestockRequest>, NetworkError> {
        self.get_json("list restock history", &["api", "restock-history"])
            .await
    }

    async fn delete_request(&self, request_id: &RequestId) -> Result<(), NetworkError> {
        let url = self.endpoint(&["api", "restock-request", request_id.as_str()]);
        self.execute("delete restock request", self.http.delete(url))
            .await?;
        Ok(())
    }

    async fn reset_demo_data(&self) -> Result<(), NetworkError> {
        self.execute(
            "reset demo data",
            self.http
                .post(self.endpoint(&["api", "demo-data"]))
                .header(reqwest::header::CONTENT_TYPE, "application/json"),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
