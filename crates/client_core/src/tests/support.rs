//! In-memory doubles shared by the controller tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{Employee, EmployeeId, Product, ProductId, RequestId},
    protocol::{NewRestockRequest, RestockRequest},
};
use tokio::sync::broadcast;

use crate::{
    dashboard::{EmbeddedWidget, WidgetConfig, WidgetHost},
    error::{NetworkError, WidgetRefreshError},
    events::{ClientEvent, ConfirmationPrompt, Notice},
    gateway::RestockGateway,
};

pub(crate) fn request(id: &str, product: &str, requester: &str) -> RestockRequest {
    RestockRequest {
        request_id: RequestId::from(id),
        product_id: ProductId::from(format!("prod-{product}")),
        product_name: product.to_string(),
        quantity: 3,
        requested_by: EmployeeId::from(format!("emp-{requester}")),
        requested_by_name: requester.to_string(),
        timestamp: "2025-06-01 10:15:00".to_string(),
    }
}

#[derive(Default)]
pub(crate) struct FakeGateway {
    pub products: Vec<Product>,
    pub employees: Vec<Employee>,
    history: Mutex<Vec<RestockRequest>>,
    scripted_history: Mutex<VecDeque<(Duration, Vec<RestockRequest>)>>,
    failing: Mutex<HashMap<&'static str, u16>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    calls: Mutex<Vec<&'static str>>,
    pub submitted: Mutex<Vec<NewRestockRequest>>,
    pub deleted: Mutex<Vec<RequestId>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            products: vec![
                Product {
                    product_id: ProductId::from("p1"),
                    name: "Tape".into(),
                },
                Product {
                    product_id: ProductId::from("p2"),
                    name: "Thermal Printer".into(),
                },
            ],
            employees: vec![Employee {
                employee_id: EmployeeId::from("e1"),
                name: "Vivian Shang".into(),
                role: "Inventory Manager".into(),
            }],
            ..Self::default()
        }
    }

    pub fn with_history(self, rows: Vec<RestockRequest>) -> Self {
        *self.history.lock().expect("history") = rows;
        self
    }

    pub fn set_history(&self, rows: Vec<RestockRequest>) {
        *self.history.lock().expect("history") = rows;
    }

    /// Queues one `list_history` response that arrives after `delay`.
    pub fn script_history(&self, delay: Duration, rows: Vec<RestockRequest>) {
        self.scripted_history
            .lock()
            .expect("script")
            .push_back((delay, rows));
    }

    pub fn fail(&self, operation: &'static str, status: u16) {
        self.failing.lock().expect("failing").insert(operation, status);
    }

    pub fn recover(&self, operation: &'static str) {
        self.failing.lock().expect("failing").remove(operation);
    }

    pub fn delay(&self, operation: &'static str, delay: Duration) {
        self.delays.lock().expect("delays").insert(operation, delay);
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .filter(|call| **call == operation)
            .count()
    }

    async fn enter(&self, operation: &'static str) -> Result<(), NetworkError> {
        self.calls.lock().expect("calls").push(operation);
        let delay = self.delays.lock().expect("delays").get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let status = self.failing.lock().expect("failing").get(operation).copied();
        match status {
            Some(status) => Err(NetworkError::Status { operation, status }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RestockGateway for FakeGateway {
    async fn list_products(&self) -> Result<Vec<Product>, NetworkError> {
        self.enter("list products").await?;
        Ok(self.products.clone())
    }

    async fn list_employees(&self) -> Result<Vec<Employee>, NetworkError> {
        self.enter("list employees").await?;
        Ok(self.employees.clone())
    }

    async fn submit_request(&self, request: &NewRestockRequest) -> Result<(), NetworkError> {
        self.enter("submit restock request").await?;
        self.submitted.lock().expect("submitted").push(request.clone());
        Ok(())
    }

    async fn list_history(&self) -> Result<Vec<RestockRequest>, NetworkError> {
        let scripted = self.scripted_history.lock().expect("script").pop_front();
        self.enter("list restock history").await?;
        if let Some((delay, rows)) = scripted {
            tokio::time::sleep(delay).await;
            return Ok(rows);
        }
        Ok(self.history.lock().expect("history").clone())
    }

    async fn delete_request(&self, request_id: &RequestId) -> Result<(), NetworkError> {
        self.enter("delete restock request").await?;
        self.deleted.lock().expect("deleted").push(request_id.clone());
        self.history
            .lock()
            .expect("history")
            .retain(|r| &r.request_id != request_id);
        Ok(())
    }

    async fn reset_demo_data(&self) -> Result<(), NetworkError> {
        self.enter("reset demo data").await
    }
}

/// Answers every prompt with a fixed reply and records the questions.
pub(crate) struct ScriptedPrompt {
    answer: bool,
    pub asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().expect("asked").clone()
    }
}

#[async_trait]
impl ConfirmationPrompt for ScriptedPrompt {
    async fn confirm(&self, message: &str) -> bool {
        self.asked.lock().expect("asked").push(message.to_string());
        self.answer
    }
}

pub(crate) fn drain_notices(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<Notice> {
    let mut notices = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ClientEvent::Notice(notice) = event {
            notices.push(notice);
        }
    }
    notices
}

/// Creates widgets without a native refresh call; counts source reloads.
#[derive(Default)]
pub(crate) struct ReloadingHost {
    pub reloads: Arc<AtomicUsize>,
}

impl ReloadingHost {
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

struct ReloadingWidget {
    src: Mutex<String>,
    reloads: Arc<AtomicUsize>,
}

#[async_trait]
impl EmbeddedWidget for ReloadingWidget {
    fn src(&self) -> String {
        self.src.lock().expect("src").clone()
    }

    async fn set_src(&self, src: &str) -> Result<(), WidgetRefreshError> {
        if !src.is_empty() {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }
        *self.src.lock().expect("src") = src.to_string();
        Ok(())
    }
}

#[async_trait]
impl WidgetHost for ReloadingHost {
    async fn create(
        &self,
        config: &WidgetConfig,
    ) -> Result<Arc<dyn EmbeddedWidget>, WidgetRefreshError> {
        Ok(Arc::new(ReloadingWidget {
            src: Mutex::new(config.src.clone()),
            reloads: self.reloads.clone(),
        }))
    }
}
