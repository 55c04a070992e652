use serde::Serialize;
use serde_json::{json, Value};

use super::{ok, ok_with_notice, parse_payload, respond};
use crate::catalog::{self, CatalogEntry, CatalogSort, CatalogView, FoodItemForm, ProductForm};
use crate::error::{AppError, AppResult};
use crate::models::Category;
use crate::notice::Notice;
use crate::preferences::{CatalogScreen, ViewMode};
use crate::{value_str, AppState};

fn screen_from(payload: &Value) -> AppResult<CatalogScreen> {
    value_str(payload, &["screen"])
        .unwrap_or_else(|| "products".to_string())
        .parse::<CatalogScreen>()
        .map_err(|e| AppError::validation("screen", e))
}

/// Catalog edits are limited to admins and managers.
pub(crate) async fn require_stock_role(state: &AppState) -> AppResult<()> {
    let session = state.session.read().await;
    match session.identity() {
        Some(identity) if identity.role.can_manage_stock() => Ok(()),
        Some(_) => Err(AppError::Auth {
            status: 403,
            message: "Your role cannot change stock or catalog data".into(),
        }),
        None => Err(AppError::Auth {
            status: 401,
            message: "Not signed in".into(),
        }),
    }
}

fn render_page<T: CatalogEntry + Serialize>(
    view: &CatalogView<T>,
    categories: &[Category],
    view_mode: ViewMode,
) -> Value {
    let page = view.visible();
    json!({
        "items": page.items,
        "page": page.page,
        "pageCount": page.page_count,
        "total": page.total,
        "categories": categories,
        "filter": {
            "categories": view.filter().categories(),
            "search": view.filter().search(),
        },
        "viewMode": view_mode.to_string(),
    })
}

/// Apply the filter / sort / page fields present in the payload. A bad
/// field leaves the view untouched.
fn apply_view_payload<T: CatalogEntry>(view: &mut CatalogView<T>, payload: &Value) -> AppResult<()> {
    let sort = payload
        .get("sort")
        .map(|raw| {
            serde_json::from_value::<CatalogSort>(raw.clone())
                .map_err(|_| AppError::validation("sort", "Unknown sort order"))
        })
        .transpose()?;

    let mut filter = view.filter().clone();
    if let Some(list) = payload.get("categories").and_then(|v| v.as_array()) {
        filter.set_categories(list.iter().filter_map(|v| v.as_str()).map(str::to_string));
    }
    if let Some(name) = value_str(payload, &["toggleCategory"]) {
        filter.toggle_category(&name);
    }
    if let Some(search) = payload.get("search").and_then(|v| v.as_str()) {
        filter.set_search(search);
    }
    view.set_filter(filter);

    if let Some(sort) = sort {
        view.set_sort(sort);
    }
    if let Some(page) = payload.get("page").and_then(|v| v.as_u64()) {
        view.set_page(page as usize);
    }
    Ok(())
}

/// Fetch the list and categories for a catalog screen, once per view load.
pub async fn catalog_load(state: &AppState, payload: Value) -> Value {
    respond(state, "catalog_load", catalog_load_inner(state, &payload).await)
}

async fn catalog_load_inner(state: &AppState, payload: &Value) -> AppResult<Value> {
    let screen = screen_from(payload)?;
    let token = state.screen_token();
    let api = state.client().await;
    let view_mode = state.preferences.view_mode(screen);

    match screen {
        CatalogScreen::Products => {
            let (items, categories) = tokio::try_join!(
                catalog::load_products(&api),
                catalog::load_categories(&api)
            )?;
            if token.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let mut view = state.products.lock().await;
            view.replace_items(items);
            *state.categories.lock().await = categories.clone();
            Ok(ok(render_page(&*view, &categories, view_mode)))
        }
        CatalogScreen::FoodItems => {
            let (items, categories) = tokio::try_join!(
                catalog::load_food_items(&api),
                catalog::load_categories(&api)
            )?;
            if token.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let mut view = state.food_items.lock().await;
            view.replace_items(items);
            *state.categories.lock().await = categories.clone();
            Ok(ok(render_page(&*view, &categories, view_mode)))
        }
    }
}

/// Re-derive the visible page after a filter, sort or page change.
pub async fn catalog_view(state: &AppState, payload: Value) -> Value {
    respond(state, "catalog_view", catalog_view_inner(state, &payload).await)
}

async fn catalog_view_inner(state: &AppState, payload: &Value) -> AppResult<Value> {
    let screen = screen_from(payload)?;
    let view_mode = state.preferences.view_mode(screen);
    let categories = state.categories.lock().await.clone();
    match screen {
        CatalogScreen::Products => {
            let mut view = state.products.lock().await;
            apply_view_payload(&mut *view, payload)?;
            Ok(ok(render_page(&*view, &categories, view_mode)))
        }
        CatalogScreen::FoodItems => {
            let mut view = state.food_items.lock().await;
            apply_view_payload(&mut *view, payload)?;
            Ok(ok(render_page(&*view, &categories, view_mode)))
        }
    }
}

pub async fn catalog_create_product(state: &AppState, payload: Value) -> Value {
    let result = async {
        require_stock_role(state).await?;
        let form: ProductForm = parse_payload(payload)?;
        let product = catalog::create_product(&state.client().await, &form).await?;
        state.products.lock().await.push(product.clone());
        Ok::<Value, AppError>(ok_with_notice(
            product,
            Notice::success("Product created", &state.config),
        ))
    }
    .await;
    respond(state, "catalog_create_product", result)
}

pub async fn catalog_create_food_item(state: &AppState, payload: Value) -> Value {
    let result = async {
        require_stock_role(state).await?;
        let form: FoodItemForm = parse_payload(payload)?;
        let item = catalog::create_food_item(&state.client().await, &form).await?;
        state.food_items.lock().await.push(item.clone());
        Ok::<Value, AppError>(ok_with_notice(
            item,
            Notice::success("Food item created", &state.config),
        ))
    }
    .await;
    respond(state, "catalog_create_food_item", result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn catalog_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "productId": 1, "productName": "Tomato", "sellingPrice": 2.5,
                  "category": { "categoryId": 1, "categoryName": "Veg" } },
                { "productId": 2, "productName": "Beef", "sellingPrice": 12.0,
                  "category": { "categoryId": 2, "categoryName": "Meat" } },
                { "productId": 3, "productName": "Onion", "sellingPrice": 1.0,
                  "category": { "categoryId": 1, "categoryName": "Veg" } }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/categories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "categoryId": 1, "categoryName": "Veg" },
                { "categoryId": 2, "categoryName": "Meat" }
            ])))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn load_then_filter_and_sort() {
        let server = catalog_server().await;
        let state =
            test_support::state_with_store(&server.uri(), test_support::signed_in_store());

        let body = catalog_load(&state, json!({ "screen": "products" })).await;
        assert_eq!(body["data"]["total"], json!(3));
        assert_eq!(body["data"]["categories"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["data"]["viewMode"], json!("table"));

        let body = catalog_view(
            &state,
            json!({ "screen": "products", "categories": ["Veg"], "sort": "name_asc" }),
        )
        .await;
        let names: Vec<&str> = body["data"]["items"]
            .as_array()
            .expect("items")
            .iter()
            .filter_map(|i| i["productName"].as_str())
            .collect();
        assert_eq!(names, vec!["Onion", "Tomato"]);
        assert_eq!(body["data"]["total"], json!(2));

        let body = catalog_view(&state, json!({ "screen": "products", "search": "zzz" })).await;
        assert_eq!(body["data"]["total"], json!(0));
        assert_eq!(body["data"]["pageCount"], json!(1));
    }

    #[tokio::test]
    async fn load_discarded_after_leaving_screen() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{ "productId": 1, "productName": "Tomato" }]))
                    .set_delay(std::time::Duration::from_millis(150)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/categories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let state = test_support::state_for(&server.uri());
        let (body, ()) = tokio::join!(
            catalog_load(&state, json!({ "screen": "products" })),
            async {
                tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                state.leave_screen();
            }
        );
        assert_eq!(body["cancelled"], json!(true));
        assert!(state.products.lock().await.items().is_empty());
    }

    #[tokio::test]
    async fn unknown_sort_is_a_field_error_and_changes_nothing() {
        let state = test_support::state_for("http://localhost:1");
        let body = catalog_view(
            &state,
            json!({ "screen": "products", "search": "beef", "categories": ["Meat"], "sort": "random" }),
        )
        .await;
        assert_eq!(body["fieldErrors"][0]["field"], json!("sort"));

        let view = state.products.lock().await;
        assert_eq!(view.filter().search(), "");
        assert!(view.filter().categories().is_empty());
    }

    #[tokio::test]
    async fn chefs_cannot_create_products() {
        let store = test_support::signed_in_store();
        crate::storage::CredentialStore::set(store.as_ref(), crate::storage::KEY_ROLE, "chef")
            .expect("role");
        let state = test_support::state_with_store("http://localhost:1", store);
        let body = catalog_create_product(&state, json!({ "productName": "Salt" })).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["notice"]["surface"], json!("banner"));
    }
}
