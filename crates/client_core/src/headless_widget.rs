use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use crate::{
    dashboard::{EmbeddedWidget, WidgetConfig, WidgetHost},
    error::WidgetRefreshError,
};

pub struct HeadlessWidgetHost {
    http: Client,
}

impl HeadlessWidgetHost {
    pub fn new(timeout: Duration) -> Result<Self, WidgetRefreshError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WidgetRefreshError::Create(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl WidgetHost for HeadlessWidgetHost {
    async fn create(
        &self,
        config: &WidgetConfig,
    ) -> Result<Arc<dyn EmbeddedWidget>, WidgetRefreshError> {
        let widget = HeadlessWidget {
            http: self.http.clone(),
            src: Mutex::new(String::new()),
        };
        widget
            .load(&config.src)
            .await
            .map_err(|err| WidgetRefreshError::Create(err.to_string()))?;
        *widget.lock_src() = config.src.clone();
        Ok(Arc::new(widget))
    }
}

pub struct HeadlessWidget {
    http: Client,
    src: Mutex<String>,
}

impl HeadlessWidget {
    fn lock_src(&self) -> std::sync::MutexGuard<'_, String> {
        self.src.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn load(&self, src: &str) -> Result<(), WidgetRefreshError> {
        let body = self
            .http
            .get(src)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| WidgetRefreshError::Failed(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| WidgetRefreshError::Failed(e.to_string()))?;
        info!(src, bytes = body.len(), "dashboard view loaded");
        Ok(())
    }
}

#[async_trait]
impl EmbeddedWidget for HeadlessWidget {
    fn src(&self) -> String {
        self.lock_src().clone()
    }

    async fn set_src(&self, src: &str) -> Result<(), WidgetRefreshError> {
        *self.lock_src() = src.to_string();
        if src.is_empty() {
            return Ok(());
        }
        self.load(src).await
    }
}

#[cfg(test)]
#[path = "tests/headless_widget_tests.rs"]
mod tests;
