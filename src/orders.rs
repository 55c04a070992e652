//! Supplier orders: receipt status aggregation, line-item toggling, delivery
//! confirmation and the receipt cart used to raise new orders.
//!
//! The server stores an order's line items as a JSON-encoded string. It is
//! decoded once when the board loads; a list that fails to decode is reported
//! as [`AppError::MalformedItems`] and the order is kept off the board.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::api::ApiClient;
use crate::config::render_path;
use crate::error::{AppError, AppResult};
use crate::models::{BranchId, NewOrder, OrderDto, OrderId, OrderLineItem, OrderPatch, ProductId};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    Pending,
    PartiallyReceived,
    Received,
}

/// All received, some received, or none. An empty list is pending.
pub fn aggregate_status(items: &[OrderLineItem]) -> ReceiptStatus {
    let received = items.iter().filter(|i| i.item_status).count();
    if !items.is_empty() && received == items.len() {
        ReceiptStatus::Received
    } else if received > 0 {
        ReceiptStatus::PartiallyReceived
    } else {
        ReceiptStatus::Pending
    }
}

pub fn decode_items(order_id: OrderId, raw: &str) -> AppResult<Vec<OrderLineItem>> {
    serde_json::from_str(raw).map_err(|e| AppError::MalformedItems {
        order_id,
        reason: e.to_string(),
    })
}

pub fn encode_items(items: &[OrderLineItem]) -> AppResult<String> {
    serde_json::to_string(items).map_err(|e| AppError::Decode(format!("order items: {e}")))
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: OrderId,
    pub supplier_id: i64,
    pub branch_id: BranchId,
    pub ordered_date: DateTime<Utc>,
    pub items: Vec<OrderLineItem>,
    pub delivered: bool,
}

impl Order {
    pub fn from_wire(dto: OrderDto) -> AppResult<Self> {
        let items = decode_items(dto.order_id, &dto.items)?;
        Ok(Self {
            order_id: dto.order_id,
            supplier_id: dto.supplier_id,
            branch_id: dto.branch_id,
            ordered_date: dto.ordered_date,
            items,
            delivered: dto.order_status,
        })
    }

    /// Decode one order row as the server returned it.
    pub fn from_row(row: Value) -> AppResult<Self> {
        let order_id = row.get("orderId").and_then(Value::as_i64);
        let dto: OrderDto = serde_json::from_value(row).map_err(|e| match order_id {
            Some(id) => AppError::Decode(format!("order {id}: {e}")),
            None => AppError::Decode(format!("order: {e}")),
        })?;
        Self::from_wire(dto)
    }

    pub fn status(&self) -> ReceiptStatus {
        aggregate_status(&self.items)
    }

    /// Flip one line's received flag and return the new aggregate status.
    fn flip(&mut self, product_id: ProductId) -> AppResult<ReceiptStatus> {
        let order_id = self.order_id;
        let item = self
            .items
            .iter_mut()
            .find(|i| i.product_id == product_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("product {product_id} in order {order_id}"))
            })?;
        item.item_status = !item.item_status;
        Ok(self.status())
    }
}

/// Serialized row for the order board, status included.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCard<'a> {
    #[serde(flatten)]
    pub order: &'a Order,
    pub status: ReceiptStatus,
}

impl<'a> From<&'a Order> for OrderCard<'a> {
    fn from(order: &'a Order) -> Self {
        Self {
            order,
            status: order.status(),
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Raw order rows, decoded one by one by the board.
    async fn list_orders(&self, branch_id: BranchId) -> AppResult<Vec<Value>>;

    async fn update_order(&self, order_id: OrderId, patch: &OrderPatch) -> AppResult<()>;

    /// `Ok(None)` when the server acknowledges without echoing the order.
    async fn create_order(&self, order: &NewOrder) -> AppResult<Option<Value>>;
}

#[async_trait]
impl OrderGateway for ApiClient {
    async fn list_orders(&self, branch_id: BranchId) -> AppResult<Vec<Value>> {
        let path = render_path(&self.endpoints().orders_by_branch, &[("branchId", branch_id)]);
        self.get_json(&path, "orders").await
    }

    async fn update_order(&self, order_id: OrderId, patch: &OrderPatch) -> AppResult<()> {
        let path = render_path(&self.endpoints().order, &[("orderId", order_id)]);
        self.put(&path, &patch.to_body(), &format!("order {order_id}"))
            .await
    }

    async fn create_order(&self, order: &NewOrder) -> AppResult<Option<Value>> {
        let body = serde_json::to_value(order).map_err(|e| AppError::Decode(e.to_string()))?;
        self.post_json(&self.endpoints().orders, &body, "order").await
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// Pending and delivered orders of one branch.
#[derive(Debug, Clone, Default)]
pub struct OrderBoard {
    branch_id: Option<BranchId>,
    pending: Vec<Order>,
    delivered: Vec<Order>,
    decode_failures: Vec<AppError>,
}

impl OrderBoard {
    /// Build the board from raw rows. A row that fails to decode, whether
    /// its fields or its embedded items, is reported and left off the board.
    pub fn from_orders(branch_id: BranchId, rows: Vec<Value>) -> Self {
        let mut board = Self {
            branch_id: Some(branch_id),
            ..Self::default()
        };
        for row in rows {
            match Order::from_row(row) {
                Ok(order) if order.delivered => board.delivered.push(order),
                Ok(order) => board.pending.push(order),
                Err(e) => {
                    warn!(branch_id, error = %e, "skipping unreadable order");
                    board.decode_failures.push(e);
                }
            }
        }
        board.sort_delivered();
        board
    }

    pub async fn load(gateway: &dyn OrderGateway, branch_id: BranchId) -> AppResult<Self> {
        let rows = gateway.list_orders(branch_id).await?;
        let board = Self::from_orders(branch_id, rows);
        info!(
            branch_id,
            pending = board.pending.len(),
            delivered = board.delivered.len(),
            malformed = board.decode_failures.len(),
            "order board loaded"
        );
        Ok(board)
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn pending(&self) -> &[Order] {
        &self.pending
    }

    /// Newest first.
    pub fn delivered(&self) -> &[Order] {
        &self.delivered
    }

    pub fn decode_failures(&self) -> &[AppError] {
        &self.decode_failures
    }

    pub fn find(&self, order_id: OrderId) -> Option<&Order> {
        self.pending
            .iter()
            .chain(self.delivered.iter())
            .find(|o| o.order_id == order_id)
    }

    pub fn add_pending(&mut self, order: Order) {
        self.pending.push(order);
    }

    fn sort_delivered(&mut self) {
        self.delivered
            .sort_by(|a, b| b.ordered_date.cmp(&a.ordered_date));
    }

    fn pending_mut(&mut self, order_id: OrderId) -> AppResult<&mut Order> {
        if self.delivered.iter().any(|o| o.order_id == order_id) {
            return Err(AppError::validation(
                "orderId",
                "This order has already been delivered",
            ));
        }
        self.pending
            .iter_mut()
            .find(|o| o.order_id == order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))
    }

    /// Flip a line's received flag in local state only.
    pub fn toggle_local(&mut self, order_id: OrderId, product_id: ProductId) -> AppResult<ReceiptStatus> {
        self.pending_mut(order_id)?.flip(product_id)
    }

    /// Flip a line's received flag and persist the re-encoded items. When
    /// the write fails the flip is undone, so the board always matches what
    /// the server last accepted.
    pub async fn toggle(
        &mut self,
        gateway: &dyn OrderGateway,
        order_id: OrderId,
        product_id: ProductId,
    ) -> AppResult<ReceiptStatus> {
        let status = self.toggle_local(order_id, product_id)?;
        let encoded = encode_items(&self.pending_mut(order_id)?.items)?;

        if let Err(e) = gateway
            .update_order(order_id, &OrderPatch::Items(encoded))
            .await
        {
            warn!(order_id, product_id, error = %e, "item toggle not saved, reverting");
            self.toggle_local(order_id, product_id)?;
            return Err(e);
        }
        debug!(order_id, product_id, status = ?status, "order item toggled");
        Ok(status)
    }

    /// Mark a fully received order as delivered and move it to the delivered
    /// list. Nothing moves when `cancel` fired while the request was out.
    pub async fn confirm_delivery(
        &mut self,
        gateway: &dyn OrderGateway,
        order_id: OrderId,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let status = self.pending_mut(order_id)?.status();
        if status != ReceiptStatus::Received {
            return Err(AppError::validation(
                "orderId",
                "All items must be received before confirming delivery",
            ));
        }

        gateway
            .update_order(order_id, &OrderPatch::OrderStatus(true))
            .await?;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        if let Some(pos) = self.pending.iter().position(|o| o.order_id == order_id) {
            let mut order = self.pending.remove(pos);
            order.delivered = true;
            self.delivered.push(order);
            self.sort_delivered();
        }
        info!(order_id, "order delivery confirmed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Receipt cart
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    #[validate(range(min = 1, message = "Choose a product"))]
    pub product_id: ProductId,
    #[serde(default)]
    pub product_name: String,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub order_quantity: i64,
    #[serde(default)]
    pub units_of_measure: String,
}

/// Lines collected before raising a supplier order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptCart {
    supplier_id: Option<i64>,
    lines: Vec<CartLine>,
}

impl ReceiptCart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn supplier_id(&self) -> Option<i64> {
        self.supplier_id
    }

    pub fn set_supplier(&mut self, supplier_id: Option<i64>) {
        self.supplier_id = supplier_id;
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Adding a product already in the cart adds to its quantity.
    pub fn add_line(&mut self, line: CartLine) -> AppResult<()> {
        line.validate()?;
        match self
            .lines
            .iter_mut()
            .find(|l| l.product_id == line.product_id)
        {
            Some(existing) => {
                existing.order_quantity = existing
                    .order_quantity
                    .checked_add(line.order_quantity)
                    .ok_or_else(|| AppError::validation("orderQuantity", "Quantity is too large"))?;
            }
            None => self.lines.push(line),
        }
        Ok(())
    }

    pub fn remove_line(&mut self, product_id: ProductId) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.product_id != product_id);
        self.lines.len() != before
    }

    pub fn clear(&mut self) {
        self.supplier_id = None;
        self.lines.clear();
    }

    pub fn to_new_order(&self, branch_id: BranchId, ordered_date: DateTime<Utc>) -> AppResult<NewOrder> {
        let supplier_id = self
            .supplier_id
            .ok_or_else(|| AppError::validation("supplierId", "Choose a supplier"))?;
        if self.lines.is_empty() {
            return Err(AppError::validation("items", "Add at least one product"));
        }
        let items: Vec<OrderLineItem> = self
            .lines
            .iter()
            .map(|l| OrderLineItem {
                product_id: l.product_id,
                product_name: l.product_name.clone(),
                order_quantity: l.order_quantity,
                units_of_measure: l.units_of_measure.clone(),
                item_status: false,
            })
            .collect();
        Ok(NewOrder {
            supplier_id,
            branch_id,
            ordered_date,
            items: encode_items(&items)?,
            order_status: false,
        })
    }

    /// Raise the order and empty the cart. Returns the created order when
    /// the server echoes it in a readable form; the order exists either way.
    pub async fn submit(
        &mut self,
        gateway: &dyn OrderGateway,
        branch_id: BranchId,
    ) -> AppResult<Option<Order>> {
        let new_order = self.to_new_order(branch_id, Utc::now())?;
        let created = gateway.create_order(&new_order).await?;
        info!(
            branch_id,
            supplier_id = new_order.supplier_id,
            lines = self.lines.len(),
            "supplier order created"
        );
        self.clear();
        Ok(created.and_then(|row| match Order::from_row(row) {
            Ok(order) => Some(order),
            Err(e) => {
                warn!(branch_id, error = %e, "created order echo is unreadable");
                None
            }
        }))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
