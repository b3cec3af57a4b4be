use serde::{Deserialize, Serialize};

use crate::domain::{EmployeeId, ProductId, RequestId};

/// Never mutated client-side; the server assigns `request_id` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestockRequest {
    pub request_id: RequestId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub requested_by: EmployeeId,
    pub requested_by_name: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRestockRequest {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub requested_by: EmployeeId,
}
