use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use super::catalog::require_stock_role;
use super::{ok, ok_with_notice, respond};
use crate::catalog;
use crate::error::{AppError, AppResult};
use crate::inventory::{InventoryGateway, InventoryScreen, ReconcileReport};
use crate::notice::Notice;
use crate::{value_i64, AppState};

fn screen_json(screen: &InventoryScreen) -> Value {
    json!({
        "branchId": screen.branch_id(),
        "rows": screen.rows(),
        "pendingEdits": screen.edits(),
    })
}

fn report_json(report: &ReconcileReport) -> Value {
    let items: Vec<Value> = report
        .items
        .iter()
        .map(|item| match &item.outcome {
            Ok(outcome) => json!({
                "productId": item.product_id,
                "quantity": item.quantity,
                "outcome": outcome,
            }),
            Err(e) => json!({
                "productId": item.product_id,
                "quantity": item.quantity,
                "error": e.user_message(),
            }),
        })
        .collect();
    json!({ "branchId": report.branch_id, "saved": report.is_success(), "items": items })
}

/// Load the branch's products and stock records.
pub async fn inventory_load(state: &AppState) -> Value {
    respond(state, "inventory_load", inventory_load_inner(state).await)
}

async fn inventory_load_inner(state: &AppState) -> AppResult<Value> {
    let branch_id = state.session.read().await.active_branch()?;
    let token = state.screen_token();
    let api = state.client().await;

    let (products, records) = tokio::try_join!(
        catalog::load_products(&api),
        api.list_branch(branch_id)
    )?;
    if token.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    let mut screen = state.inventory.lock().await;
    screen.load(branch_id, products, records);
    Ok(ok(screen_json(&screen)))
}

/// Track one quantity edit from the grid.
pub async fn inventory_edit(state: &AppState, payload: Value) -> Value {
    let result = async {
        let product_id = value_i64(&payload, &["productId", "product_id"])
            .ok_or_else(|| AppError::validation("productId", "Choose a product"))?;
        let quantity = value_i64(&payload, &["quantity"])
            .ok_or_else(|| AppError::validation("quantity", "Enter a whole number"))?;
        let mut screen = state.inventory.lock().await;
        screen.record_edit(product_id, quantity);
        Ok::<Value, AppError>(ok(json!({ "pendingEdits": screen.edits() })))
    }
    .await;
    respond(state, "inventory_edit", result)
}

pub async fn inventory_discard(state: &AppState) -> Value {
    let mut screen = state.inventory.lock().await;
    screen.discard_edits();
    ok(screen_json(&screen))
}

/// Reconcile the pending edits. Partial failure keeps every edit so the
/// user can retry.
pub async fn inventory_save(state: &AppState) -> Value {
    respond(state, "inventory_save", inventory_save_inner(state).await)
}

async fn inventory_save_inner(state: &AppState) -> AppResult<Value> {
    require_stock_role(state).await?;
    let token = state.screen_token();
    let gateway: Arc<dyn InventoryGateway> = Arc::new(state.client().await);

    let mut screen = state.inventory.lock().await;
    if screen.edits().is_empty() {
        return Ok(ok_with_notice(
            screen_json(&screen),
            Notice::info("Nothing to save", &state.config),
        ));
    }
    let report = screen
        .save(gateway, state.config.reconcile_concurrency, &token)
        .await?;

    let mut body = report_json(&report);
    body["screen"] = screen_json(&screen);
    if report.is_success() {
        return Ok(ok_with_notice(
            body,
            Notice::success("Inventory saved", &state.config),
        ));
    }

    let failed = report.failures().count();
    warn!(
        branch_id = report.branch_id,
        failed,
        total = report.items.len(),
        "inventory save incomplete"
    );
    Ok(json!({
        "success": false,
        "data": body,
        "notice": Notice::failure(
            format!("{failed} of {} items could not be saved. Your edits were kept.", report.items.len()),
            &state.config,
        ),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn inventory_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "productId": 42, "productName": "Flour", "thresholdLimit": 10 },
                { "productId": 43, "productName": "Sugar", "thresholdLimit": 10 }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/inventory/branch/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "branchId": 7, "productId": 43, "quantity": 20 }
            ])))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn load_edit_and_save_creates_missing_record() {
        let server = inventory_server().await;
        Mock::given(method("GET"))
            .and(path("/inventory/branch/7/product/42"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/inventory"))
            .and(body_json(json!({ "branchId": 7, "productId": 42, "quantity": 15 })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let state =
            test_support::state_with_store(&server.uri(), test_support::signed_in_store());
        let body = inventory_load(&state).await;
        assert_eq!(body["data"]["rows"][0]["level"], json!("out"));
        assert_eq!(body["data"]["rows"][1]["quantity"], json!(20));

        inventory_edit(&state, json!({ "productId": 42, "quantity": 15 })).await;
        let body = inventory_save(&state).await;

        assert_eq!(body["success"], json!(true));
        assert_eq!(body["notice"]["kind"], json!("success"));
        assert_eq!(body["data"]["items"][0]["outcome"], json!("created"));
        assert_eq!(body["data"]["screen"]["rows"][0]["quantity"], json!(15));
        assert!(state.inventory.lock().await.edits().is_empty());
    }

    #[tokio::test]
    async fn negative_quantity_is_rejected_inline() {
        let server = inventory_server().await;
        let state =
            test_support::state_with_store(&server.uri(), test_support::signed_in_store());
        inventory_load(&state).await;
        inventory_edit(&state, json!({ "productId": 42, "quantity": -1 })).await;

        let body = inventory_save(&state).await;
        assert_eq!(body["fieldErrors"][0]["field"], json!("quantity[42]"));
        assert!(body.get("notice").is_none());
        assert_eq!(state.inventory.lock().await.edits().len(), 1);
    }

    #[tokio::test]
    async fn partial_failure_keeps_edits_and_warns() {
        let server = inventory_server().await;
        Mock::given(method("GET"))
            .and(path("/inventory/branch/7/product/42"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/inventory/branch/7/product/43"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({ "branchId": 7, "productId": 43, "quantity": 20 }),
            ))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/inventory/branch/7/product/43"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let state =
            test_support::state_with_store(&server.uri(), test_support::signed_in_store());
        inventory_load(&state).await;
        inventory_edit(&state, json!({ "productId": 42, "quantity": 5 })).await;
        inventory_edit(&state, json!({ "productId": 43, "quantity": 25 })).await;

        let body = inventory_save(&state).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["notice"]["kind"], json!("error"));
        assert!(body["data"]["items"][0]["error"].is_string());
        assert_eq!(body["data"]["items"][1]["outcome"], json!("updated"));
        assert_eq!(state.inventory.lock().await.edits().len(), 2);
    }

    #[tokio::test]
    async fn load_without_branch_asks_for_one() {
        let state = test_support::state_for("http://localhost:1");
        let body = inventory_load(&state).await;
        assert_eq!(body["fieldErrors"][0]["field"], json!("branchId"));
    }
}
