use serde_json::{json, Value};

use super::{ok, ok_with_notice, parse_payload, respond};
use crate::error::{AppError, AppResult};
use crate::notice::Notice;
use crate::orders::{CartLine, OrderBoard, OrderCard};
use crate::{value_i64, AppState};

fn board_json(board: &OrderBoard) -> Value {
    let pending: Vec<OrderCard<'_>> = board.pending().iter().map(OrderCard::from).collect();
    let delivered: Vec<OrderCard<'_>> = board.delivered().iter().map(OrderCard::from).collect();
    let malformed: Vec<String> = board
        .decode_failures()
        .iter()
        .map(|e| e.to_string())
        .collect();
    json!({
        "branchId": board.branch_id(),
        "pending": pending,
        "delivered": delivered,
        "malformed": malformed,
    })
}

fn required_id(payload: &Value, keys: &[&str], field: &str, message: &str) -> AppResult<i64> {
    value_i64(payload, keys).ok_or_else(|| AppError::validation(field, message))
}

/// Load the active branch's orders onto the board.
pub async fn orders_load(state: &AppState) -> Value {
    respond(state, "orders_load", orders_load_inner(state).await)
}

async fn orders_load_inner(state: &AppState) -> AppResult<Value> {
    let branch_id = state.session.read().await.active_branch()?;
    let token = state.screen_token();
    let api = state.client().await;

    let board = OrderBoard::load(&api, branch_id).await?;
    if token.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    let mut current = state.orders.lock().await;
    *current = board;
    let body = board_json(&current);
    if current.decode_failures().is_empty() {
        Ok(ok(body))
    } else {
        let skipped = current.decode_failures().len();
        Ok(ok_with_notice(
            body,
            Notice::failure(
                format!("{skipped} order(s) could not be read and are not shown"),
                &state.config,
            ),
        ))
    }
}

/// Flip one line item's received flag and persist it.
pub async fn orders_toggle_item(state: &AppState, payload: Value) -> Value {
    let result = async {
        let order_id = required_id(&payload, &["orderId", "order_id"], "orderId", "Choose an order")?;
        let product_id =
            required_id(&payload, &["productId", "product_id"], "productId", "Choose a product")?;
        let api = state.client().await;
        let mut board = state.orders.lock().await;
        let status = board.toggle(&api, order_id, product_id).await?;
        let order = board.find(order_id).map(OrderCard::from);
        Ok::<Value, AppError>(ok(json!({ "status": status, "order": order })))
    }
    .await;
    respond(state, "orders_toggle_item", result)
}

pub async fn orders_confirm_delivery(state: &AppState, payload: Value) -> Value {
    let result = async {
        let order_id = required_id(&payload, &["orderId", "order_id"], "orderId", "Choose an order")?;
        let token = state.screen_token();
        let api = state.client().await;
        let mut board = state.orders.lock().await;
        board.confirm_delivery(&api, order_id, &token).await?;
        Ok::<Value, AppError>(ok_with_notice(
            board_json(&board),
            Notice::success("Delivery confirmed", &state.config),
        ))
    }
    .await;
    respond(state, "orders_confirm_delivery", result)
}

// ---------------------------------------------------------------------------
// Receipt cart
// ---------------------------------------------------------------------------

pub async fn cart_get(state: &AppState) -> Value {
    let cart = state.cart.lock().await;
    ok(&*cart)
}

pub async fn cart_set_supplier(state: &AppState, payload: Value) -> Value {
    let mut cart = state.cart.lock().await;
    cart.set_supplier(value_i64(&payload, &["supplierId", "supplier_id"]));
    ok(&*cart)
}

pub async fn cart_add_line(state: &AppState, payload: Value) -> Value {
    let result = async {
        let line: CartLine = parse_payload(payload)?;
        let mut cart = state.cart.lock().await;
        cart.add_line(line)?;
        Ok::<Value, AppError>(ok(&*cart))
    }
    .await;
    respond(state, "cart_add_line", result)
}

pub async fn cart_remove_line(state: &AppState, payload: Value) -> Value {
    let result = async {
        let product_id =
            required_id(&payload, &["productId", "product_id"], "productId", "Choose a product")?;
        let mut cart = state.cart.lock().await;
        if !cart.remove_line(product_id) {
            return Err(AppError::NotFound(format!("product {product_id} in cart")));
        }
        Ok::<Value, AppError>(ok(&*cart))
    }
    .await;
    respond(state, "cart_remove_line", result)
}

/// Raise a supplier order from the cart and add it to the pending board.
pub async fn cart_submit(state: &AppState) -> Value {
    respond(state, "cart_submit", cart_submit_inner(state).await)
}

async fn cart_submit_inner(state: &AppState) -> AppResult<Value> {
    let branch_id = state.session.read().await.active_branch()?;
    let api = state.client().await;

    let created = state.cart.lock().await.submit(&api, branch_id).await?;
    let mut board = state.orders.lock().await;
    match created {
        Some(order) if board.branch_id() == Some(branch_id) => board.add_pending(order),
        // Not echoed by the server: reload so the board shows the new order.
        _ => *board = OrderBoard::load(&api, branch_id).await?,
    }
    Ok(ok_with_notice(
        board_json(&board),
        Notice::success("Order placed", &state.config),
    ))
}
