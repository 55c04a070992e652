//! Wire types for the REST API.
//!
//! Field names follow the server's camelCase JSON. Every response is decoded
//! into one of these types at the network boundary; nothing downstream sees
//! a raw `serde_json::Value` from the API.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub type BranchId = i64;
pub type ProductId = i64;
pub type OrderId = i64;

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub category_id: i64,
    pub category_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitOfMeasure {
    pub unit_id: i64,
    pub unit_name: String,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: ProductId,
    pub product_name: String,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub purchase_price: f64,
    #[serde(default)]
    pub selling_price: f64,
    #[serde(default)]
    pub unit_of_measure: Option<UnitOfMeasure>,
    /// Reorder trigger. `None` when the product is not stock-tracked.
    #[serde(default)]
    pub threshold_limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodItem {
    pub food_item_id: i64,
    pub food_item_name: String,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// Stock of one product at one branch. Unique per (branch, product).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRecord {
    pub branch_id: BranchId,
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Body of `PUT inventory-by-branch-and-product`.
#[derive(Debug, Clone, Serialize)]
pub struct QuantityUpdate {
    pub quantity: i64,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// One product line inside an order's embedded item list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub order_quantity: i64,
    #[serde(default)]
    pub units_of_measure: String,
    #[serde(default)]
    pub item_status: bool,
}

/// An order as the server stores it: `items` is a JSON-encoded string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDto {
    pub order_id: OrderId,
    pub supplier_id: i64,
    pub branch_id: BranchId,
    #[serde(
        deserialize_with = "deserialize_flexible_date",
        serialize_with = "serialize_date"
    )]
    pub ordered_date: DateTime<Utc>,
    pub items: String,
    #[serde(default)]
    pub order_status: bool,
}

/// Body of `POST order collection`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub supplier_id: i64,
    pub branch_id: BranchId,
    #[serde(serialize_with = "serialize_date")]
    pub ordered_date: DateTime<Utc>,
    pub items: String,
    pub order_status: bool,
}

/// Body of `PUT order by id`: exactly one of the two fields is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderPatch {
    Items(String),
    OrderStatus(bool),
}

impl OrderPatch {
    pub fn to_body(&self) -> serde_json::Value {
        match self {
            OrderPatch::Items(items) => serde_json::json!({ "items": items }),
            OrderPatch::OrderStatus(status) => serde_json::json!({ "orderStatus": status }),
        }
    }
}

// ---------------------------------------------------------------------------
// Organisation / branch / users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organisation {
    pub organisation_id: i64,
    pub organisation_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub branch_id: BranchId,
    pub branch_name: String,
    #[serde(default)]
    pub address: Option<String>,
    pub organisation_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub user_id: i64,
    pub username: String,
    pub role: String,
    #[serde(default)]
    pub organisation_id: Option<i64>,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: UserDto,
}

// ---------------------------------------------------------------------------
// Date helpers
// ---------------------------------------------------------------------------

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_flexible_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn deserialize_flexible_date<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_flexible_date(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {raw}")))
}

fn serialize_date<S: Serializer>(date: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&date.to_rfc3339())
}
