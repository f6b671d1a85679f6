//! The list the console is showing and the data behind it.

use chrono::Utc;
use color_eyre::Result;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::backend::{
  BackendQueryKey, CachedBackend, Lease, MaintenanceRequest, MaintenanceStatus,
  MaintenanceStatusPatch, NewMaintenanceRequest, Payment, Property, Table, Unit,
};
use crate::cache::{CacheResult, CacheSource, QueryKey};
use crate::format::{format_currency, truncate};
use crate::notify::Notifier;
use crate::optimistic::OptimisticList;
use crate::paginated::PaginatedQuery;
use crate::query::{Query, QueryOptions};

/// Everything a view needs to load its data.
#[derive(Clone)]
pub struct ViewContext {
  pub backend: CachedBackend,
  pub page_size: u32,
  pub query_options: QueryOptions,
  pub notifier: Arc<dyn Notifier>,
}

pub enum View {
  Properties(Query<Vec<Property>>),
  Units(Query<Vec<Unit>>),
  /// Units of one property, read once through the cache
  PropertyUnits(ScopedUnits),
  Leases(PaginatedQuery<Lease>),
  Payments {
    pages: PaginatedQuery<Payment>,
    lease: watch::Sender<Option<String>>,
  },
  Maintenance(MaintenanceBoard),
}

pub struct ScopedUnits {
  property_id: String,
  pending: Option<oneshot::Receiver<Result<CacheResult<Vec<Unit>>>>>,
  result: Option<CacheResult<Vec<Unit>>>,
  error: Option<String>,
}

/// Maintenance requests with optimistic resolve, delete and report.
pub struct MaintenanceBoard {
  query: Query<Vec<MaintenanceRequest>>,
  list: OptimisticList<MaintenanceRequest>,
}

static NEXT_DRAFT: AtomicU64 = AtomicU64::new(1);

fn table_query<T>(ctx: &ViewContext, table: Table) -> Query<Vec<T>>
where
  T: DeserializeOwned + Send + Sync + 'static,
{
  let key = BackendQueryKey::All { table };
  debug!(query = %key.description(), "opening query");
  let client = ctx.backend.client().clone();
  let mut query = Query::new(ctx.backend.cache().clone(), key.cache_hash(), move || {
    let client = client.clone();
    async move { client.fetch_all::<T>(table).await }
  })
  .with_options(ctx.query_options);
  query.mount();
  query
}

fn maintenance_list(ctx: &ViewContext) -> OptimisticList<MaintenanceRequest> {
  OptimisticList::new(Vec::new())
    .with_notifier(Arc::clone(&ctx.notifier))
    .on_success("Maintenance request saved")
    .on_error("Could not save the maintenance request")
}

fn payments_key(lease: Option<&str>) -> String {
  match lease {
    Some(id) => format!("payments:lease={}", id),
    None => "payments".to_string(),
  }
}

impl View {
  pub fn properties(ctx: &ViewContext) -> Self {
    View::Properties(table_query(ctx, Table::Properties))
  }

  pub fn units(ctx: &ViewContext) -> Self {
    View::Units(table_query(ctx, Table::Units))
  }

  pub fn property_units(ctx: &ViewContext, property_id: &str) -> Self {
    let mut scoped = ScopedUnits {
      property_id: property_id.trim().to_string(),
      pending: None,
      result: None,
      error: None,
    };
    scoped.load(ctx);
    View::PropertyUnits(scoped)
  }

  pub fn leases(ctx: &ViewContext) -> Self {
    let client = ctx.backend.client().clone();
    let mut pages = PaginatedQuery::new("leases", ctx.page_size, move |page, size| {
      let client = client.clone();
      async move { client.list::<Lease>(Table::Leases, page, size).await }
    });
    pages.mount();
    View::Leases(pages)
  }

  pub fn payments(ctx: &ViewContext, lease: Option<&str>) -> Self {
    let (lease_tx, lease_rx) = watch::channel(lease.map(str::to_string));
    let client = ctx.backend.client().clone();
    let mut pages = PaginatedQuery::new(payments_key(lease), ctx.page_size, move |page, size| {
      let client = client.clone();
      let lease = lease_rx.borrow().clone();
      async move {
        match lease {
          Some(id) => {
            client
              .list_where::<Payment>(Table::Payments, "lease_id", &id, page, size)
              .await
          }
          None => client.list::<Payment>(Table::Payments, page, size).await,
        }
      }
    });
    pages.mount();
    View::Payments {
      pages,
      lease: lease_tx,
    }
  }

  pub fn maintenance(ctx: &ViewContext) -> Self {
    let mut board = MaintenanceBoard {
      query: table_query(ctx, Table::MaintenanceRequests),
      list: maintenance_list(ctx),
    };
    board.sync();
    View::Maintenance(board)
  }

  /// Narrow the payments view to one lease, or widen it again. Returns
  /// `false` if this is not the payments view.
  pub fn filter_payments(&mut self, lease_id: Option<&str>) -> bool {
    let View::Payments { pages, lease } = self else {
      return false;
    };
    lease.send_replace(lease_id.map(str::to_string));
    pages.set_key(payments_key(lease_id));
    true
  }

  pub fn title(&self) -> String {
    match self {
      View::Properties(_) => "Properties".to_string(),
      View::Units(_) => "Units".to_string(),
      View::PropertyUnits(scoped) => format!("Units of {}", scoped.property_id),
      View::Leases(_) => "Leases".to_string(),
      View::Payments { lease, .. } => match lease.borrow().as_deref() {
        Some(id) => format!("Payments for lease {}", id),
        None => "Payments".to_string(),
      },
      View::Maintenance(_) => "Maintenance".to_string(),
    }
  }

  /// Apply finished loads. Returns `true` if anything changed.
  pub fn poll(&mut self) -> bool {
    match self {
      View::Properties(query) => query.poll(),
      View::Units(query) => query.poll(),
      View::PropertyUnits(scoped) => scoped.poll(),
      View::Leases(pages) => pages.poll(),
      View::Payments { pages, .. } => pages.poll(),
      View::Maintenance(board) => board.poll(),
    }
  }

  pub fn refresh(&mut self, ctx: &ViewContext) {
    match self {
      View::Properties(query) => query.refetch(),
      View::Units(query) => query.refetch(),
      View::PropertyUnits(scoped) => {
        ctx.backend.cache().evict(&scoped.key().cache_hash());
        scoped.load(ctx);
      }
      View::Leases(pages) => pages.refresh(),
      View::Payments { pages, .. } => pages.refresh(),
      View::Maintenance(board) => board.query.refetch(),
    }
  }

  /// Request the next page of a paged view. Returns `false` if nothing was
  /// requested.
  pub fn load_more(&mut self) -> bool {
    match self {
      View::Leases(pages) => pages.load_more(),
      View::Payments { pages, .. } => pages.load_more(),
      _ => false,
    }
  }

  pub fn maintenance_board(&self) -> Option<&MaintenanceBoard> {
    match self {
      View::Maintenance(board) => Some(board),
      _ => None,
    }
  }

  /// One-line summary of loading, staleness and errors.
  pub fn status(&self) -> String {
    match self {
      View::Properties(query) => query_status(query),
      View::Units(query) => query_status(query),
      View::PropertyUnits(scoped) => scoped.status(),
      View::Leases(pages) => pages_status(pages),
      View::Payments { pages, .. } => pages_status(pages),
      View::Maintenance(board) => query_status(&board.query),
    }
  }

  pub fn rows(&self, currency: &str) -> Vec<String> {
    match self {
      View::Properties(query) => query
        .data()
        .map(|items| items.iter().map(property_row).collect())
        .unwrap_or_default(),
      View::Units(query) => query
        .data()
        .map(|items| items.iter().map(|u| unit_row(u, currency)).collect())
        .unwrap_or_default(),
      View::PropertyUnits(scoped) => scoped
        .result
        .as_ref()
        .map(|r| r.data.iter().map(|u| unit_row(u, currency)).collect())
        .unwrap_or_default(),
      View::Leases(pages) => pages.items().iter().map(|l| lease_row(l, currency)).collect(),
      View::Payments { pages, .. } => pages
        .items()
        .iter()
        .map(|p| payment_row(p, currency))
        .collect(),
      View::Maintenance(board) => board.list.items().iter().map(maintenance_row).collect(),
    }
  }
}

impl ScopedUnits {
  fn key(&self) -> BackendQueryKey {
    BackendQueryKey::scoped(Table::Units, "property_id", &self.property_id)
  }

  fn load(&mut self, ctx: &ViewContext) {
    let (tx, rx) = oneshot::channel();
    self.pending = Some(rx);
    let backend = ctx.backend.clone();
    let property_id = self.property_id.clone();
    tokio::spawn(async move {
      let result = backend
        .scoped::<Unit>(Table::Units, "property_id", &property_id)
        .await;
      let _ = tx.send(result);
    });
  }

  fn poll(&mut self) -> bool {
    let Some(pending) = &mut self.pending else {
      return false;
    };
    let outcome = match pending.try_recv() {
      Ok(outcome) => outcome,
      Err(oneshot::error::TryRecvError::Empty) => return false,
      Err(oneshot::error::TryRecvError::Closed) => {
        self.pending = None;
        self.error = Some("load was cancelled".to_string());
        return true;
      }
    };
    self.pending = None;
    match outcome {
      Ok(result) => {
        self.result = Some(result);
        self.error = None;
      }
      Err(e) => self.error = Some(format!("{:#}", e)),
    }
    true
  }

  fn status(&self) -> String {
    if let Some(error) = &self.error {
      return format!("error: {}", error);
    }
    if self.pending.is_some() && self.result.is_none() {
      return "loading...".to_string();
    }
    match self.result.as_ref().map(|r| r.source) {
      Some(CacheSource::Offline) => "offline, showing cached units".to_string(),
      Some(CacheSource::CacheFresh) | Some(CacheSource::CacheStale) => "cached".to_string(),
      Some(CacheSource::Network) | None => String::new(),
    }
  }
}

impl MaintenanceBoard {
  /// Seed the optimistic list from the latest fetched rows.
  fn sync(&mut self) {
    if let Some(data) = self.query.data() {
      self.list.replace_all(data.as_ref().clone());
    }
  }

  fn poll(&mut self) -> bool {
    let changed = self.query.poll();
    if changed {
      self.sync();
    }
    changed
  }

  pub fn contains(&self, id: &str) -> bool {
    self.list.find(&id.to_string()).is_some()
  }

  /// Mark a request resolved now; rolled back if the backend refuses.
  pub fn resolve(&self, ctx: &ViewContext, id: &str) -> impl Future<Output = ()> + Send + 'static {
    let list = self.list.clone();
    let backend = ctx.backend.clone();
    let id = id.to_string();
    async move {
      let patch = MaintenanceStatusPatch {
        status: MaintenanceStatus::Resolved,
      };
      let saved = list
        .update_item(
          &id,
          |request| MaintenanceRequest {
            status: MaintenanceStatus::Resolved,
            ..request.clone()
          },
          || backend.update::<_, MaintenanceRequest>(Table::MaintenanceRequests, &id, &patch),
        )
        .await;
      if saved.is_ok() {
        reload_requests(&backend).await;
      }
    }
  }

  /// Remove a request now; restored if the backend refuses.
  pub fn delete(&self, ctx: &ViewContext, id: &str) -> impl Future<Output = ()> + Send + 'static {
    let list = self.list.clone();
    let backend = ctx.backend.clone();
    let id = id.to_string();
    async move {
      let saved = list
        .remove_item(&id, || backend.delete(Table::MaintenanceRequests, &id))
        .await;
      if saved.is_ok() {
        reload_requests(&backend).await;
      }
    }
  }

  /// Show a new request at the end of the list while it is being saved.
  pub fn report(&self, ctx: &ViewContext, unit_id: &str, title: &str) -> impl Future<Output = ()> + Send + 'static {
    let list = self.list.clone();
    let backend = ctx.backend.clone();
    let draft = MaintenanceRequest {
      id: format!("draft-{}", NEXT_DRAFT.fetch_add(1, Ordering::Relaxed)),
      unit_id: unit_id.to_string(),
      title: title.to_string(),
      description: None,
      status: MaintenanceStatus::Open,
      created_at: Utc::now(),
    };
    let row = NewMaintenanceRequest {
      unit_id: unit_id.to_string(),
      title: title.to_string(),
      status: MaintenanceStatus::Open,
    };
    async move {
      let saved = list
        .add_item(draft, || {
          backend.insert::<_, MaintenanceRequest>(Table::MaintenanceRequests, &row)
        })
        .await;
      if saved.is_ok() {
        reload_requests(&backend).await;
      }
    }
  }
}

/// Pull the saved listing so every view of it converges. The write already
/// succeeded, so a failure here is only logged.
async fn reload_requests(backend: &CachedBackend) {
  if let Err(e) = backend
    .reload::<MaintenanceRequest>(Table::MaintenanceRequests)
    .await
  {
    warn!(error = %format!("{:#}", e), "could not reload maintenance requests after a write");
  }
}

fn query_status<T>(query: &Query<T>) -> String
where
  T: Send + Sync + 'static,
{
  if let Some(error) = query.error() {
    if query.data().is_some() {
      return format!("showing last data, refresh failed: {}", error);
    }
    return format!("error: {}", error);
  }
  if query.is_loading() {
    return "loading...".to_string();
  }
  if query.is_stale() {
    return "stale, refreshing".to_string();
  }
  if query.is_fetching() {
    return "refreshing...".to_string();
  }
  String::new()
}

fn pages_status<T: Send + 'static>(pages: &PaginatedQuery<T>) -> String {
  if let Some(error) = pages.error() {
    return format!("error: {}", error);
  }
  if pages.is_loading() {
    return "loading...".to_string();
  }
  if pages.is_loading_more() {
    return "loading more...".to_string();
  }
  if pages.has_more() {
    return format!("page {}, :more for the next", pages.page());
  }
  format!("page {}, end of list", pages.page())
}

fn property_row(p: &Property) -> String {
  format!(
    "{:<12} {:<24} {:<32} {} units",
    truncate(&p.id, 12),
    truncate(&p.name, 24),
    truncate(&p.address, 32),
    p.unit_count
  )
}

fn unit_row(u: &Unit, currency: &str) -> String {
  format!(
    "{:<12} {:<12} {:>18} {}",
    truncate(&u.id, 12),
    truncate(&u.label, 12),
    format_currency(u.rent_amount, currency),
    if u.occupied { "occupied" } else { "vacant" }
  )
}

fn lease_row(l: &Lease, currency: &str) -> String {
  let end = l
    .end_date
    .map(|d| d.to_string())
    .unwrap_or_else(|| "open".to_string());
  format!(
    "{:<12} unit {:<12} {} to {:<10} {:>18} {:?}",
    truncate(&l.id, 12),
    truncate(&l.unit_id, 12),
    l.start_date,
    end,
    format_currency(l.rent_amount, currency),
    l.status
  )
}

fn payment_row(p: &Payment, currency: &str) -> String {
  format!(
    "{:<12} {} {:>18} {:?} {}",
    truncate(&p.id, 12),
    p.paid_at.format("%Y-%m-%d"),
    format_currency(p.amount, currency),
    p.status,
    p.reference.as_deref().unwrap_or("")
  )
}

fn maintenance_row(m: &MaintenanceRequest) -> String {
  format!(
    "{:<12} [{:<11}] {}",
    truncate(&m.id, 12),
    m.status.label(),
    truncate(&m.title, 48)
  )
}
