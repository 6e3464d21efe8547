use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::StructuredData;
use crate::workflow::stage::Stage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub i64);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An order row: legacy flat columns plus the structured document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// Legacy sales manager name, used by the permission fallback.
    pub manager_name: Option<String>,
    pub structured_data: StructuredData,
    /// Optimistic-concurrency counter, bumped on every persisted change.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(id: OrderId, customer_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            customer_name: customer_name.into(),
            phone: None,
            address: None,
            manager_name: None,
            structured_data: StructuredData::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stage of the order; documents predating the workflow read as `Received`.
    pub fn stage(&self) -> Stage {
        self.structured_data.current_stage().unwrap_or(Stage::Received)
    }
}

/// Input for order intake.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub manager_name: Option<String>,
}

impl NewOrder {
    /// An order with an empty document; stores assign the real id on insert.
    pub fn into_order(self, id: OrderId, now: DateTime<Utc>) -> Order {
        let mut order = Order::new(id, self.customer_name, now);
        order.phone = self.phone;
        order.address = self.address;
        order.manager_name = self.manager_name;
        order
    }
}
