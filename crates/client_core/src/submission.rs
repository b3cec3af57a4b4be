use std::{
    num::IntErrorKind,
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use shared::{
    domain::{Employee, EmployeeId, Product, ProductId},
    protocol::NewRestockRequest,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    error::{FormErrors, FormField, NetworkError, SubmitError},
    events::{emit, ClientEvent, Notice, SubmitStatus},
    gateway::{ReferenceData, RestockGateway},
    lease::TaskLease,
    signal::{RefreshBus, RefreshOrigin, RefreshSubscription},
};

pub const SUCCESS_NOTICE_DURATION: Duration = Duration::from_secs(3);
pub const SUBMIT_SUCCESS_NOTICE: &str =
    "Request submitted successfully! The dashboard will update shortly.";
pub const QUANTITY_TOO_LARGE: &str = "Quantity is too large";
pub const SUBMIT_FAILED_NOTICE: &str = "Submission failed. Please try again.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestockForm {
    pub product_id: String,
    pub quantity: String,
    pub requested_by: String,
}

impl RestockForm {
    pub fn field_mut(&mut self, field: FormField) -> &mut String {
        match field {
            FormField::ProductId => &mut self.product_id,
            FormField::Quantity => &mut self.quantity,
            FormField::RequestedBy => &mut self.requested_by,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedForm {
    pub product_id: ProductId,
    pub quantity: u32,
    pub requested_by: EmployeeId,
}

pub fn validate(form: &RestockForm) -> Result<ValidatedForm, FormErrors> {
    let mut errors = FormErrors::default();

    let product_id = form.product_id.trim();
    if product_id.is_empty() {
        errors.insert(FormField::ProductId, "Please select a product");
    }

    let quantity = match form.quantity.trim().parse::<u32>() {
        Ok(quantity) if quantity > 0 => quantity,
        Err(err) if *err.kind() == IntErrorKind::PosOverflow => {
            errors.insert(FormField::Quantity, QUANTITY_TOO_LARGE);
            0
        }
        _ => {
            errors.insert(FormField::Quantity, "Quantity must be greater than 0");
            0
        }
    };

    let requested_by = form.requested_by.trim();
    if requested_by.is_empty() {
        errors.insert(FormField::RequestedBy, "Please select who is requesting");
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ValidatedForm {
        product_id: ProductId::from(product_id),
        quantity,
        requested_by: EmployeeId::from(requested_by),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionSnapshot {
    pub form: RestockForm,
    pub errors: FormErrors,
    pub submitting: bool,
    pub status: Option<SubmitStatus>,
}

#[derive(Default)]
struct SubmissionState {
    form: RestockForm,
    errors: FormErrors,
    submitting: bool,
    status: Option<SubmitStatus>,
    status_epoch: u64,
    reference: ReferenceData,
}

pub struct SubmissionController {
    gateway: Arc<dyn RestockGateway>,
    bus: RefreshBus,
    events: broadcast::Sender<ClientEvent>,
    notice_duration: Duration,
    state: Mutex<SubmissionState>,
    listener: Mutex<Option<TaskLease>>,
    status_reset: Mutex<Option<TaskLease>>,
}

impl SubmissionController {
    pub async fn mount(
        gateway: Arc<dyn RestockGateway>,
        bus: RefreshBus,
        events: broadcast::Sender<ClientEvent>,
        notice_duration: Duration,
    ) -> Arc<Self> {
        let subscription = bus.subscribe();
        let controller = Arc::new(Self {
            gateway,
            bus,
            events,
            notice_duration,
            state: Mutex::new(SubmissionState::default()),
            listener: Mutex::new(None),
            status_reset: Mutex::new(None),
        });

        if let Err(err) = controller.load_reference_data().await {
            warn!(error = %err, "failed to load products and employees");
        }

        *lock(&controller.listener) = Some(TaskLease::spawn(
            "submission reset listener",
            listen_for_reset(Arc::downgrade(&controller), subscription),
        ));
        controller
    }

    pub async fn load_reference_data(&self) -> Result<(), NetworkError> {
        let reference = self.gateway.load_reference_data().await?;
        debug!(
            products = reference.products.len(),
            employees = reference.employees.len(),
            "reference data loaded"
        );
        self.lock_state().reference = reference;
        Ok(())
    }

    pub fn products(&self) -> Vec<Product> {
        self.lock_state().reference.products.clone()
    }

    pub fn employees(&self) -> Vec<Employee> {
        self.lock_state().reference.employees.clone()
    }

    pub fn snapshot(&self) -> SubmissionSnapshot {
        let state = self.lock_state();
        SubmissionSnapshot {
            form: state.form.clone(),
            errors: state.errors.clone(),
            submitting: state.submitting,
            status: state.status,
        }
    }

    pub fn set_field(&self, field: FormField, value: impl Into<String>) {
        let mut state = self.lock_state();
        *state.form.field_mut(field) = value.into();
        state.errors.remove(field);
    }

    pub async fn submit(self: &Arc<Self>) -> Result<NewRestockRequest, SubmitError> {
        let payload = {
            let mut state = self.lock_state();
            if state.submitting {
                return Err(SubmitError::InFlight);
            }
            let validated = match validate(&state.form) {
                Ok(validated) => validated,
                Err(errors) => {
                    debug!(fields = ?errors.keys(), "restock form rejected");
                    state.errors = errors.clone();
                    return Err(errors.into());
                }
            };
            let name = state
                .reference
                .products
                .iter()
                .find(|product| product.product_id == validated.product_id)
                .map(|product| product.name.clone())
                .unwrap_or_default();

            state.submitting = true;
            state.status = None;
            state.status_epoch += 1;
            NewRestockRequest {
                product_id: validated.product_id,
                name,
                quantity: validated.quantity,
                requested_by: validated.requested_by,
            }
        };
        let submitting = Submitting { controller: self };
        emit(&self.events, ClientEvent::SubmitStatusChanged(None));

        let result = self.gateway.submit_request(&payload).await;
        drop(submitting);

        match result {
            Ok(()) => {
                let epoch = {
                    let mut state = self.lock_state();
                    state.form = RestockForm::default();
                    state.errors.clear();
                    state.status = Some(SubmitStatus::Success);
                    state.status_epoch
                };
                info!(product_id = %payload.product_id, quantity = payload.quantity, "restock request submitted");
                self.bus.publish(RefreshOrigin::Submission);
                emit(&self.events, ClientEvent::SubmitStatusChanged(Some(SubmitStatus::Success)));
                emit(&self.events, ClientEvent::Notice(Notice::success(SUBMIT_SUCCESS_NOTICE)));
                self.schedule_status_clear(epoch);
                Ok(payload)
            }
            Err(err) => {
                self.lock_state().status = Some(SubmitStatus::Error);
                warn!(error = %err, "restock request submission failed");
                emit(&self.events, ClientEvent::SubmitStatusChanged(Some(SubmitStatus::Error)));
                emit(&self.events, ClientEvent::Notice(Notice::error(SUBMIT_FAILED_NOTICE)));
                Err(err.into())
            }
        }
    }

    pub fn teardown(&self) {
        for slot in [&self.listener, &self.status_reset] {
            if let Some(mut lease) = lock(slot).take() {
                lease.cancel();
            }
        }
    }

    fn schedule_status_clear(self: &Arc<Self>, epoch: u64) {
        let controller = Arc::downgrade(self);
        let delay = self.notice_duration;
        let lease = TaskLease::spawn("submit status reset", async move {
            tokio::time::sleep(delay).await;
            let Some(controller) = controller.upgrade() else {
                return;
            };
            let cleared = {
                let mut state = controller.lock_state();
                // A newer submit owns the status now.
                if state.status_epoch == epoch && state.status == Some(SubmitStatus::Success) {
                    state.status = None;
                    true
                } else {
                    false
                }
            };
            if cleared {
                emit(&controller.events, ClientEvent::SubmitStatusChanged(None));
            }
        });
        *lock(&self.status_reset) = Some(lease);
    }

    fn lock_state(&self) -> MutexGuard<'_, SubmissionState> {
        lock(&self.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn listen_for_reset(controller: Weak<SubmissionController>, mut subscription: RefreshSubscription) {
    while let Some(signal) = subscription.changed().await {
        if signal.origin != RefreshOrigin::Reset {
            continue;
        }
        let Some(controller) = controller.upgrade() else {
            break;
        };
        if let Err(err) = controller.load_reference_data().await {
            warn!(error = %err, "failed to reload reference data after reset");
        }
    }
}

struct Submitting<'a> {
    controller: &'a SubmissionController,
}

impl Drop for Submitting<'_> {
    fn drop(&mut self) {
        self.controller.lock_state().submitting = false;
    }
}

#[cfg(test)]
#[path = "tests/submission_tests.rs"]
mod tests;
