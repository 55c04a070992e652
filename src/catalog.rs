//! Product and food-item catalogs: loading, creation, and the in-memory
//! filter / sort / paginate pipeline behind the catalog grids.
//!
//! Lists are fetched once per view and are small (hundreds of rows), so the
//! derived sequence is recomputed on every call without caching.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::info;
use validator::Validate;

use crate::api::ApiClient;
use crate::error::{AppError, AppResult};
use crate::models::{Category, FoodItem, Product};

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// What the filter pipeline needs to know about a catalog row.
pub trait CatalogEntry {
    fn display_name(&self) -> &str;
    fn category_name(&self) -> Option<&str>;
    fn price(&self) -> f64;
}

impl CatalogEntry for Product {
    fn display_name(&self) -> &str {
        &self.product_name
    }

    fn category_name(&self) -> Option<&str> {
        self.category.as_ref().map(|c| c.category_name.as_str())
    }

    fn price(&self) -> f64 {
        self.selling_price
    }
}

impl CatalogEntry for FoodItem {
    fn display_name(&self) -> &str {
        &self.food_item_name
    }

    fn category_name(&self) -> Option<&str> {
        self.category.as_ref().map(|c| c.category_name.as_str())
    }

    fn price(&self) -> f64 {
        self.price
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Category membership AND case-insensitive name search. Empty predicates
/// pass everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogFilter {
    categories: BTreeSet<String>,
    search: String,
}

impl CatalogFilter {
    pub fn new<I, S>(categories: I, search: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories: categories.into_iter().map(Into::into).collect(),
            search: search.to_string(),
        }
    }

    pub fn categories(&self) -> &BTreeSet<String> {
        &self.categories
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    /// Add the category if absent, remove it if present.
    pub fn toggle_category(&mut self, name: &str) {
        if !self.categories.remove(name) {
            self.categories.insert(name.to_string());
        }
    }

    pub fn set_categories<I, S>(&mut self, categories: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
    }

    pub fn set_search(&mut self, search: &str) {
        self.search = search.to_string();
    }

    pub fn matches<T: CatalogEntry>(&self, item: &T) -> bool {
        let category_ok = self.categories.is_empty()
            || item
                .category_name()
                .map(|c| self.categories.contains(c))
                .unwrap_or(false);
        if !category_ok {
            return false;
        }
        if self.search.is_empty() {
            return true;
        }
        item.display_name()
            .to_lowercase()
            .contains(&self.search.to_lowercase())
    }

    /// Fresh derived sequence in source order. The source is never mutated.
    pub fn apply<'a, T: CatalogEntry>(&self, items: &'a [T]) -> Vec<&'a T> {
        items.iter().filter(|item| self.matches(*item)).collect()
    }
}

// ---------------------------------------------------------------------------
// Sort
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSort {
    /// Keep the order the server returned.
    #[default]
    Source,
    NameAsc,
    NameDesc,
    PriceAsc,
    PriceDesc,
}

impl CatalogSort {
    /// Stable sort, so equal keys keep source order.
    pub fn sort<T: CatalogEntry>(&self, rows: &mut [&T]) {
        match self {
            CatalogSort::Source => {}
            CatalogSort::NameAsc => rows.sort_by(|a, b| compare_names(*a, *b)),
            CatalogSort::NameDesc => rows.sort_by(|a, b| compare_names(*b, *a)),
            CatalogSort::PriceAsc => rows.sort_by(|a, b| compare_prices(*a, *b)),
            CatalogSort::PriceDesc => rows.sort_by(|a, b| compare_prices(*b, *a)),
        }
    }
}

fn compare_names<T: CatalogEntry>(a: &T, b: &T) -> Ordering {
    a.display_name()
        .to_lowercase()
        .cmp(&b.display_name().to_lowercase())
}

fn compare_prices<T: CatalogEntry>(a: &T, b: &T) -> Ordering {
    a.price().partial_cmp(&b.price()).unwrap_or(Ordering::Equal)
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Page<'a, T> {
    pub items: Vec<&'a T>,
    /// Zero-based, clamped to the last page.
    pub page: usize,
    pub page_count: usize,
    /// Length of the whole filtered sequence (the displayed count).
    pub total: usize,
}

/// Slice one page out of a derived sequence. An empty sequence has a single
/// empty page.
pub fn paginate<'a, T>(rows: Vec<&'a T>, page: usize, per_page: usize) -> Page<'a, T> {
    let per_page = per_page.max(1);
    let total = rows.len();
    let page_count = total.div_ceil(per_page).max(1);
    let page = page.min(page_count - 1);
    let items = rows
        .into_iter()
        .skip(page * per_page)
        .take(per_page)
        .collect();
    Page {
        items,
        page,
        page_count,
        total,
    }
}

// ---------------------------------------------------------------------------
// View state
// ---------------------------------------------------------------------------

/// One catalog grid: the fetched list plus its filter, sort and page.
#[derive(Debug, Clone)]
pub struct CatalogView<T> {
    items: Vec<T>,
    filter: CatalogFilter,
    sort: CatalogSort,
    page: usize,
    per_page: usize,
}

impl<T: CatalogEntry> CatalogView<T> {
    pub fn new(per_page: usize) -> Self {
        Self {
            items: Vec::new(),
            filter: CatalogFilter::default(),
            sort: CatalogSort::default(),
            page: 0,
            per_page: per_page.max(1),
        }
    }

    pub fn replace_items(&mut self, items: Vec<T>) {
        self.items = items;
        self.page = 0;
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn filter(&self) -> &CatalogFilter {
        &self.filter
    }

    /// Changing a predicate resets to the first page.
    pub fn set_filter(&mut self, filter: CatalogFilter) {
        if filter != self.filter {
            self.page = 0;
        }
        self.filter = filter;
    }

    pub fn set_sort(&mut self, sort: CatalogSort) {
        self.sort = sort;
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page;
    }

    pub fn displayed_count(&self) -> usize {
        self.filter.apply(&self.items).len()
    }

    pub fn visible(&self) -> Page<'_, T> {
        let mut rows = self.filter.apply(&self.items);
        self.sort.sort(&mut rows);
        paginate(rows, self.page, self.per_page)
    }
}

// ---------------------------------------------------------------------------
// Loading / creation
// ---------------------------------------------------------------------------

pub async fn load_products(api: &ApiClient) -> AppResult<Vec<Product>> {
    let products: Vec<Product> = api.get_json(&api.endpoints().products, "products").await?;
    info!(count = products.len(), "products loaded");
    Ok(products)
}

pub async fn load_food_items(api: &ApiClient) -> AppResult<Vec<FoodItem>> {
    let items: Vec<FoodItem> = api
        .get_json(&api.endpoints().food_items, "food items")
        .await?;
    info!(count = items.len(), "food items loaded");
    Ok(items)
}

pub async fn load_categories(api: &ApiClient) -> AppResult<Vec<Category>> {
    api.get_json(&api.endpoints().categories, "categories").await
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProductForm {
    #[validate(length(min = 1, max = 120, message = "Product name is required"))]
    pub product_name: String,
    #[validate(range(min = 1, message = "Choose a category"))]
    pub category_id: i64,
    #[validate(range(min = 0.0, message = "Price cannot be negative"))]
    pub purchase_price: f64,
    #[validate(range(min = 0.0, message = "Price cannot be negative"))]
    pub selling_price: f64,
    #[validate(range(min = 1, message = "Choose a unit of measure"))]
    pub unit_id: i64,
    #[serde(default)]
    #[validate(range(min = 0, message = "Threshold cannot be negative"))]
    pub threshold_limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FoodItemForm {
    #[validate(length(min = 1, max = 120, message = "Food item name is required"))]
    pub food_item_name: String,
    #[validate(range(min = 1, message = "Choose a category"))]
    pub category_id: i64,
    #[validate(range(min = 0.0, message = "Price cannot be negative"))]
    pub price: f64,
    #[serde(default)]
    #[validate(length(max = 500, message = "Description is too long"))]
    pub description: Option<String>,
}

/// Validate and create a product. A duplicate name surfaces as a conflict.
pub async fn create_product(api: &ApiClient, form: &ProductForm) -> AppResult<Product> {
    form.validate()?;
    let body = serde_json::to_value(form).map_err(|e| AppError::Decode(e.to_string()))?;
    let product: Product = api
        .post_json(&api.endpoints().products, &body, "product")
        .await?;
    info!(product_id = product.product_id, "product created");
    Ok(product)
}

pub async fn create_food_item(api: &ApiClient, form: &FoodItemForm) -> AppResult<FoodItem> {
    form.validate()?;
    let body = serde_json::to_value(form).map_err(|e| AppError::Decode(e.to_string()))?;
    let item: FoodItem = api
        .post_json(&api.endpoints().food_items, &body, "food item")
        .await?;
    info!(food_item_id = item.food_item_id, "food item created");
    Ok(item)
}
