//! Inventory quantity tracking and reconciliation.
//!
//! Edits collected from the stock grid are saved as a batch. Each edit is an
//! upsert against the per-branch-per-product record: probe it, overwrite the
//! quantity when it exists, create it on 404. A failing item never stops the
//! others, but one failure means the batch is not reported as saved.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::config::render_path;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::models::{BranchId, InventoryRecord, Product, ProductId, QuantityUpdate};

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Remote inventory resource.
#[async_trait]
pub trait InventoryGateway: Send + Sync {
    /// `Err(AppError::NotFound)` when the branch has no record for the product.
    async fn fetch_record(
        &self,
        branch_id: BranchId,
        product_id: ProductId,
    ) -> AppResult<InventoryRecord>;

    async fn update_record(&self, record: &InventoryRecord) -> AppResult<()>;

    async fn create_record(&self, record: &InventoryRecord) -> AppResult<()>;

    async fn list_branch(&self, branch_id: BranchId) -> AppResult<Vec<InventoryRecord>>;
}

#[async_trait]
impl InventoryGateway for ApiClient {
    async fn fetch_record(
        &self,
        branch_id: BranchId,
        product_id: ProductId,
    ) -> AppResult<InventoryRecord> {
        let path = render_path(
            &self.endpoints().inventory_item,
            &[("branchId", branch_id), ("productId", product_id)],
        );
        self.get_json(&path, "inventory record").await
    }

    async fn update_record(&self, record: &InventoryRecord) -> AppResult<()> {
        let path = render_path(
            &self.endpoints().inventory_item,
            &[
                ("branchId", record.branch_id),
                ("productId", record.product_id),
            ],
        );
        let body = serde_json::to_value(QuantityUpdate {
            quantity: record.quantity,
        })
        .map_err(|e| AppError::Decode(e.to_string()))?;
        self.put(&path, &body, "inventory record").await
    }

    async fn create_record(&self, record: &InventoryRecord) -> AppResult<()> {
        let body = serde_json::to_value(record).map_err(|e| AppError::Decode(e.to_string()))?;
        self.post(&self.endpoints().inventory_collection, &body, "inventory")
            .await
    }

    async fn list_branch(&self, branch_id: BranchId) -> AppResult<Vec<InventoryRecord>> {
        let path = render_path(
            &self.endpoints().inventory_by_branch,
            &[("branchId", branch_id)],
        );
        self.get_json(&path, "branch inventory").await
    }
}

// ---------------------------------------------------------------------------
// Edit tracking
// ---------------------------------------------------------------------------

/// Pending quantity edits keyed by product. Iterates in product-id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EditTracker {
    edits: BTreeMap<ProductId, i64>,
}

impl EditTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `quantity` for the product. An edit back to the stored quantity
    /// is dropped, since there is nothing to save.
    pub fn record(&mut self, product_id: ProductId, quantity: i64, stored: Option<i64>) {
        if stored == Some(quantity) {
            self.edits.remove(&product_id);
        } else {
            self.edits.insert(product_id, quantity);
        }
    }

    pub fn get(&self, product_id: ProductId) -> Option<i64> {
        self.edits.get(&product_id).copied()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn clear(&mut self) {
        self.edits.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProductId, i64)> + '_ {
        self.edits.iter().map(|(p, q)| (*p, *q))
    }
}

/// All-or-nothing pre-check: every negative quantity is reported and the
/// batch must not touch the network.
pub fn validate_edits(edits: &EditTracker) -> AppResult<()> {
    let mut errors = FieldErrors::default();
    for (product_id, quantity) in edits.iter() {
        if quantity < 0 {
            errors.push(
                &format!("quantity[{product_id}]"),
                "Quantity cannot be negative",
            );
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Updated,
    Created,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub product_id: ProductId,
    pub quantity: i64,
    pub outcome: AppResult<UpsertOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub branch_id: BranchId,
    /// One entry per edit, in product-id order.
    pub items: Vec<ItemResult>,
}

impl ReconcileReport {
    pub fn is_success(&self) -> bool {
        self.items.iter().all(|i| i.outcome.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.items.iter().filter(|i| i.outcome.is_err())
    }

    pub fn count(&self, outcome: UpsertOutcome) -> usize {
        self.items
            .iter()
            .filter(|i| i.outcome.as_ref().ok() == Some(&outcome))
            .count()
    }
}

/// Probe, then overwrite or create. A 404 probe is the create path, not an
/// error.
pub async fn upsert(
    gateway: &dyn InventoryGateway,
    record: &InventoryRecord,
) -> AppResult<UpsertOutcome> {
    match gateway
        .fetch_record(record.branch_id, record.product_id)
        .await
    {
        Ok(existing) => {
            debug!(
                branch_id = record.branch_id,
                product_id = record.product_id,
                from = existing.quantity,
                to = record.quantity,
                "inventory record exists, overwriting quantity"
            );
            gateway.update_record(record).await?;
            Ok(UpsertOutcome::Updated)
        }
        Err(AppError::NotFound(_)) => {
            debug!(
                branch_id = record.branch_id,
                product_id = record.product_id,
                quantity = record.quantity,
                "no inventory record, creating"
            );
            gateway.create_record(record).await?;
            Ok(UpsertOutcome::Created)
        }
        Err(e) => Err(e),
    }
}

async fn upsert_guarded(
    gateway: &dyn InventoryGateway,
    record: &InventoryRecord,
    cancel: &CancellationToken,
) -> AppResult<UpsertOutcome> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        res = upsert(gateway, record) => res,
    }
}

/// Save a batch of edits for one branch.
///
/// Rejects the whole batch without any request when an edit is negative.
/// With `concurrency <= 1` items run one after another in product-id order;
/// otherwise at most `concurrency` upserts are in flight. Returns
/// `Err(AppError::Cancelled)` when `cancel` fires before the batch settles,
/// in which case the caller must not apply any of it.
pub async fn reconcile(
    gateway: Arc<dyn InventoryGateway>,
    branch_id: BranchId,
    edits: &EditTracker,
    concurrency: usize,
    cancel: &CancellationToken,
) -> AppResult<ReconcileReport> {
    validate_edits(edits)?;

    let records: Vec<InventoryRecord> = edits
        .iter()
        .map(|(product_id, quantity)| InventoryRecord {
            branch_id,
            product_id,
            quantity,
        })
        .collect();

    info!(
        branch_id,
        items = records.len(),
        concurrency,
        "reconciling inventory edits"
    );

    let mut items = if concurrency <= 1 {
        reconcile_sequential(gateway.as_ref(), records, cancel).await
    } else {
        reconcile_bounded(gateway, records, concurrency, cancel).await
    };

    if cancel.is_cancelled() {
        warn!(branch_id, "inventory reconciliation cancelled, discarding results");
        return Err(AppError::Cancelled);
    }

    items.sort_by_key(|i| i.product_id);
    for failed in items.iter().filter(|i| i.outcome.is_err()) {
        if let Err(e) = &failed.outcome {
            warn!(
                branch_id,
                product_id = failed.product_id,
                error = %e,
                "inventory upsert failed"
            );
        }
    }

    let report = ReconcileReport { branch_id, items };
    info!(
        branch_id,
        updated = report.count(UpsertOutcome::Updated),
        created = report.count(UpsertOutcome::Created),
        failed = report.failures().count(),
        "inventory reconciliation finished"
    );
    Ok(report)
}

async fn reconcile_sequential(
    gateway: &dyn InventoryGateway,
    records: Vec<InventoryRecord>,
    cancel: &CancellationToken,
) -> Vec<ItemResult> {
    let mut items = Vec::with_capacity(records.len());
    for record in records {
        if cancel.is_cancelled() {
            break;
        }
        let outcome = upsert_guarded(gateway, &record, cancel).await;
        items.push(ItemResult {
            product_id: record.product_id,
            quantity: record.quantity,
            outcome,
        });
    }
    items
}

async fn reconcile_bounded(
    gateway: Arc<dyn InventoryGateway>,
    records: Vec<InventoryRecord>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Vec<ItemResult> {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut set = JoinSet::new();
    let expected: BTreeSet<(ProductId, i64)> =
        records.iter().map(|r| (r.product_id, r.quantity)).collect();

    for record in records {
        let semaphore = semaphore.clone();
        let gateway = gateway.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            let outcome = match semaphore.acquire_owned().await {
                Ok(_permit) => upsert_guarded(gateway.as_ref(), &record, &cancel).await,
                Err(_) => Err(AppError::Cancelled),
            };
            ItemResult {
                product_id: record.product_id,
                quantity: record.quantity,
                outcome,
            }
        });
    }

    let mut items = Vec::with_capacity(expected.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(item) => items.push(item),
            Err(e) => error!(error = %e, "inventory upsert task failed"),
        }
    }

    // A panicked task leaves no result; report it as failed so the batch is
    // never mistaken for a success.
    for (product_id, quantity) in expected {
        if !items.iter().any(|i| i.product_id == product_id) {
            items.push(ItemResult {
                product_id,
                quantity,
                outcome: Err(AppError::Server {
                    status: 0,
                    message: "inventory update task aborted".into(),
                }),
            });
        }
    }
    items
}

// ---------------------------------------------------------------------------
// Stock levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    Out,
    Critical,
    Low,
    Ok,
}

/// Classify a quantity against a product's reorder threshold.
pub fn classify(quantity: i64, threshold: Option<i64>) -> StockLevel {
    if quantity <= 0 {
        return StockLevel::Out;
    }
    match threshold {
        Some(t) if t > 0 && quantity.checked_mul(2).is_some_and(|d| d <= t) => {
            StockLevel::Critical
        }
        Some(t) if t > 0 && quantity <= t => StockLevel::Low,
        _ => StockLevel::Ok,
    }
}

// ---------------------------------------------------------------------------
// Screen state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockRow {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub pending_quantity: Option<i64>,
    pub level: StockLevel,
}

/// The stock grid of one branch: stored quantities plus pending edits.
#[derive(Debug, Clone, Default)]
pub struct InventoryScreen {
    branch_id: Option<BranchId>,
    products: Vec<Product>,
    stock: BTreeMap<ProductId, i64>,
    edits: EditTracker,
}

impl InventoryScreen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the screen contents with freshly fetched data. Pending edits
    /// are kept only when the branch did not change.
    pub fn load(&mut self, branch_id: BranchId, products: Vec<Product>, records: Vec<InventoryRecord>) {
        if self.branch_id != Some(branch_id) {
            self.edits.clear();
        }
        self.branch_id = Some(branch_id);
        self.products = products;
        self.stock = records
            .into_iter()
            .filter(|r| r.branch_id == branch_id)
            .map(|r| (r.product_id, r.quantity))
            .collect();
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    /// Stored quantity, `None` when the branch has no record yet.
    pub fn stored_quantity(&self, product_id: ProductId) -> Option<i64> {
        self.stock.get(&product_id).copied()
    }

    pub fn edits(&self) -> &EditTracker {
        &self.edits
    }

    /// Track an edit from the grid. Negative values are accepted here and
    /// rejected when saving, so the user sees the inline error.
    pub fn record_edit(&mut self, product_id: ProductId, quantity: i64) {
        let stored = self.stored_quantity(product_id);
        self.edits.record(product_id, quantity, stored);
    }

    pub fn discard_edits(&mut self) {
        self.edits.clear();
    }

    pub fn rows(&self) -> Vec<StockRow> {
        self.products
            .iter()
            .map(|p| {
                let quantity = self.stored_quantity(p.product_id).unwrap_or(0);
                StockRow {
                    product_id: p.product_id,
                    product_name: p.product_name.clone(),
                    quantity,
                    pending_quantity: self.edits.get(p.product_id),
                    level: classify(quantity, p.threshold_limit),
                }
            })
            .collect()
    }

    /// Apply a finished batch. Only a fully successful batch updates the
    /// stored quantities and clears the edits; otherwise nothing changes so
    /// the user can retry.
    pub fn apply_report(&mut self, report: &ReconcileReport) -> bool {
        if Some(report.branch_id) != self.branch_id || !report.is_success() {
            return false;
        }
        for item in &report.items {
            self.stock.insert(item.product_id, item.quantity);
        }
        self.edits.clear();
        true
    }

    /// Validate, reconcile and apply the pending edits.
    pub async fn save(
        &mut self,
        gateway: Arc<dyn InventoryGateway>,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> AppResult<ReconcileReport> {
        let branch_id = self
            .branch_id
            .ok_or_else(|| AppError::validation("branchId", "Select a branch first"))?;
        let report = reconcile(gateway, branch_id, &self.edits, concurrency, cancel).await?;
        self.apply_report(&report);
        Ok(report)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// In-memory stand-in for the inventory API that records every call.
    #[derive(Default)]
    struct FakeInventory {
        records: Mutex<HashMap<(BranchId, ProductId), i64>>,
        calls: Mutex<Vec<String>>,
        failing: HashSet<ProductId>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeInventory {
        fn failing_on(products: &[ProductId]) -> Self {
            Self {
                failing: products.iter().copied().collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }

        fn stored(&self, branch_id: BranchId, product_id: ProductId) -> Option<i64> {
            self.records
                .lock()
                .expect("records lock")
                .get(&(branch_id, product_id))
                .copied()
        }

        async fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl InventoryGateway for FakeInventory {
        async fn fetch_record(
            &self,
            branch_id: BranchId,
            product_id: ProductId,
        ) -> AppResult<InventoryRecord> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("GET {branch_id}/{product_id}"));
            self.enter().await;
            if self.failing.contains(&product_id) {
                return Err(AppError::Server {
                    status: 500,
                    message: "boom".into(),
                });
            }
            self.stored(branch_id, product_id)
                .map(|quantity| InventoryRecord {
                    branch_id,
                    product_id,
                    quantity,
                })
                .ok_or_else(|| AppError::NotFound("inventory record".into()))
        }

        async fn update_record(&self, record: &InventoryRecord) -> AppResult<()> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("PUT {}/{}", record.branch_id, record.product_id));
            self.records
                .lock()
                .expect("records lock")
                .insert((record.branch_id, record.product_id), record.quantity);
            Ok(())
        }

        async fn create_record(&self, record: &InventoryRecord) -> AppResult<()> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("POST {}/{}", record.branch_id, record.product_id));
            self.records
                .lock()
                .expect("records lock")
                .insert((record.branch_id, record.product_id), record.quantity);
            Ok(())
        }

        async fn list_branch(&self, branch_id: BranchId) -> AppResult<Vec<InventoryRecord>> {
            Ok(self
                .records
                .lock()
                .expect("records lock")
                .iter()
                .filter(|((b, _), _)| *b == branch_id)
                .map(|((b, p), q)| InventoryRecord {
                    branch_id: *b,
                    product_id: *p,
                    quantity: *q,
                })
                .collect())
        }
    }

    fn edits(pairs: &[(ProductId, i64)]) -> EditTracker {
        let mut tracker = EditTracker::new();
        for (p, q) in pairs {
            tracker.record(*p, *q, None);
        }
        tracker
    }

    fn product(id: ProductId, threshold: Option<i64>) -> Product {
        Product {
            product_id: id,
            product_name: format!("Product {id}"),
            category: None,
            purchase_price: 0.0,
            selling_price: 0.0,
            unit_of_measure: None,
            threshold_limit: threshold,
        }
    }

    #[test]
    fn edit_back_to_stored_quantity_is_dropped() {
        let mut tracker = EditTracker::new();
        tracker.record(1, 5, Some(3));
        assert_eq!(tracker.get(1), Some(5));
        tracker.record(1, 3, Some(3));
        assert!(tracker.is_empty());
    }

    #[test]
    fn stock_level_classification() {
        assert_eq!(classify(0, Some(10)), StockLevel::Out);
        assert_eq!(classify(5, Some(10)), StockLevel::Critical);
        assert_eq!(classify(8, Some(10)), StockLevel::Low);
        assert_eq!(classify(10, Some(10)), StockLevel::Low);
        assert_eq!(classify(11, Some(10)), StockLevel::Ok);
        assert_eq!(classify(1, None), StockLevel::Ok);
        assert_eq!(classify(0, None), StockLevel::Out);
    }

    #[test]
    fn huge_quantities_classify_without_overflow() {
        assert_eq!(classify(i64::MAX, Some(10)), StockLevel::Ok);
        assert_eq!(classify(i64::MAX / 2 + 1, Some(i64::MAX)), StockLevel::Low);
        assert_eq!(classify(i64::MAX / 2, Some(i64::MAX)), StockLevel::Critical);
    }

    #[tokio::test]
    async fn negative_edit_rejects_batch_without_requests() {
        let fake = Arc::new(FakeInventory::default());
        let mut screen = InventoryScreen::new();
        screen.load(7, vec![product(1, None), product(2, None)], vec![]);
        screen.record_edit(1, 4);
        screen.record_edit(2, -1);

        let err = screen
            .save(fake.clone(), 1, &CancellationToken::new())
            .await
            .expect_err("negative quantity rejected");

        assert_eq!(
            err.field_errors().and_then(|f| f.for_field("quantity[2]")),
            Some("Quantity cannot be negative")
        );
        assert!(fake.calls().is_empty());
        assert_eq!(screen.edits().len(), 2);
    }

    #[tokio::test]
    async fn missing_record_is_created_then_overwritten() {
        let fake = Arc::new(FakeInventory::default());
        let cancel = CancellationToken::new();

        let first = reconcile(fake.clone(), 7, &edits(&[(42, 5)]), 1, &cancel)
            .await
            .expect("first batch");
        assert!(first.is_success());
        assert_eq!(first.items[0].outcome, Ok(UpsertOutcome::Created));

        let second = reconcile(fake.clone(), 7, &edits(&[(42, 2)]), 1, &cancel)
            .await
            .expect("second batch");
        assert_eq!(second.items[0].outcome, Ok(UpsertOutcome::Updated));
        // Overwrite, not accumulation.
        assert_eq!(fake.stored(7, 42), Some(2));
        assert_eq!(
            fake.calls(),
            vec!["GET 7/42", "POST 7/42", "GET 7/42", "PUT 7/42"]
        );
    }

    #[tokio::test]
    async fn failing_item_does_not_stop_the_batch_and_keeps_edits() {
        let fake = Arc::new(FakeInventory::failing_on(&[2]));
        let mut screen = InventoryScreen::new();
        screen.load(
            7,
            vec![product(1, None), product(2, None), product(3, None)],
            vec![],
        );
        screen.record_edit(1, 10);
        screen.record_edit(2, 20);
        screen.record_edit(3, 30);

        let report = screen
            .save(fake.clone(), 1, &CancellationToken::new())
            .await
            .expect("batch runs");

        assert!(!report.is_success());
        assert_eq!(
            report.failures().map(|f| f.product_id).collect::<Vec<_>>(),
            vec![2]
        );
        // Items after the failure still ran.
        assert_eq!(fake.stored(7, 3), Some(30));
        // Screen state untouched so the user can retry.
        assert_eq!(screen.edits().len(), 3);
        assert_eq!(screen.stored_quantity(1), None);
    }

    #[tokio::test]
    async fn successful_save_updates_view_and_clears_edits() {
        let fake = Arc::new(FakeInventory::default());
        let mut screen = InventoryScreen::new();
        screen.load(
            7,
            vec![product(1, Some(10)), product(2, Some(10))],
            vec![InventoryRecord {
                branch_id: 7,
                product_id: 1,
                quantity: 9,
            }],
        );
        fake.records.lock().expect("records lock").insert((7, 1), 9);
        screen.record_edit(1, 4);
        screen.record_edit(2, 12);

        let report = screen
            .save(fake.clone(), 4, &CancellationToken::new())
            .await
            .expect("save");
        assert!(report.is_success());
        assert_eq!(report.count(UpsertOutcome::Updated), 1);
        assert_eq!(report.count(UpsertOutcome::Created), 1);
        assert!(screen.edits().is_empty());

        let rows = screen.rows();
        assert_eq!(rows[0].quantity, 4);
        assert_eq!(rows[0].level, StockLevel::Critical);
        assert_eq!(rows[1].quantity, 12);
        assert_eq!(rows[1].level, StockLevel::Ok);
    }

    #[tokio::test]
    async fn sequential_mode_runs_items_in_product_order() {
        let fake = Arc::new(FakeInventory::default());
        reconcile(
            fake.clone(),
            1,
            &edits(&[(30, 1), (10, 1), (20, 1)]),
            1,
            &CancellationToken::new(),
        )
        .await
        .expect("batch");
        assert_eq!(
            fake.calls(),
            vec!["GET 1/10", "POST 1/10", "GET 1/20", "POST 1/20", "GET 1/30", "POST 1/30"]
        );
    }

    #[tokio::test]
    async fn bounded_mode_respects_the_limit() {
        let fake = Arc::new(FakeInventory {
            delay: Some(Duration::from_millis(20)),
            ..FakeInventory::default()
        });
        let pairs: Vec<(ProductId, i64)> = (1..=12).map(|p| (p, p)).collect();
        let report = reconcile(fake.clone(), 3, &edits(&pairs), 3, &CancellationToken::new())
            .await
            .expect("batch");

        assert!(report.is_success());
        assert_eq!(report.items.len(), 12);
        assert!(report.items.windows(2).all(|w| w[0].product_id < w[1].product_id));
        let max = fake.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "at most 3 probes in flight, saw {max}");
        assert_eq!(fake.stored(3, 12), Some(12));
    }

    #[tokio::test]
    async fn cancelled_batch_is_not_applied() {
        for concurrency in [1, 4] {
            let fake = Arc::new(FakeInventory::default());
            let mut screen = InventoryScreen::new();
            screen.load(7, vec![product(1, None)], vec![]);
            screen.record_edit(1, 5);

            let cancel = CancellationToken::new();
            cancel.cancel();
            let err = screen
                .save(fake.clone(), concurrency, &cancel)
                .await
                .expect_err("cancelled");

            assert_eq!(err, AppError::Cancelled);
            assert_eq!(screen.edits().len(), 1);
            assert_eq!(screen.stored_quantity(1), None);
            assert_eq!(fake.stored(7, 1), None);
        }
    }

    #[tokio::test]
    async fn cancellation_mid_batch_discards_results() {
        let fake = Arc::new(FakeInventory {
            delay: Some(Duration::from_millis(200)),
            ..FakeInventory::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let res = reconcile(fake.clone(), 7, &edits(&[(1, 1), (2, 2)]), 1, &cancel).await;
        assert_eq!(res, Err(AppError::Cancelled));
        // The first probe was in flight when the screen was left; no writes.
        assert_eq!(fake.calls(), vec!["GET 7/1"]);
    }

    #[tokio::test]
    async fn http_probe_404_creates_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/inventory/branch/7/product/42"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/inventory"))
            .and(body_json(
                serde_json::json!({"productId": 42, "branchId": 7, "quantity": 15}),
            ))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(&ClientConfig {
            api_base_url: server.uri(),
            ..ClientConfig::default()
        })
        .expect("client");
        let report = reconcile(
            Arc::new(api),
            7,
            &edits(&[(42, 15)]),
            1,
            &CancellationToken::new(),
        )
        .await
        .expect("batch");

        assert!(report.is_success());
        assert_eq!(report.items[0].outcome, Ok(UpsertOutcome::Created));
    }

    #[tokio::test]
    async fn http_existing_record_is_put() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/inventory/branch/7/product/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"branchId": 7, "productId": 42, "quantity": 3}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/inventory/branch/7/product/42"))
            .and(body_json(serde_json::json!({"quantity": 8})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(&ClientConfig {
            api_base_url: server.uri(),
            ..ClientConfig::default()
        })
        .expect("client");
        let outcome = upsert(
            &api,
            &InventoryRecord {
                branch_id: 7,
                product_id: 42,
                quantity: 8,
            },
        )
        .await;
        assert_eq!(outcome, Ok(UpsertOutcome::Updated));
    }
}
