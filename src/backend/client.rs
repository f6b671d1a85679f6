use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use super::types::Table;
use crate::config::Config;
use crate::paginated::Page;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the hosted backend's table endpoints
#[derive(Clone)]
pub struct BackendClient {
  http: Client,
  base: Url,
  api_key: String,
  access_token: Option<String>,
}

impl BackendClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    Self::with_credentials(
      &config.backend.url,
      &config.backend.schema_path,
      api_key,
      Config::get_access_token(),
    )
  }

  pub fn with_credentials(
    url: &str,
    schema_path: &str,
    api_key: String,
    access_token: Option<String>,
  ) -> Result<Self> {
    let base = table_base(url, schema_path)?;
    let http = Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .user_agent(concat!("rentdesk/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      api_key,
      access_token,
    })
  }

  fn endpoint(&self, table: Table) -> Result<Url> {
    self
      .base
      .join(table.name())
      .map_err(|e| eyre!("Invalid endpoint for {}: {}", table.name(), e))
  }

  fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
    let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
    request
      .header("apikey", &self.api_key)
      .bearer_auth(bearer)
  }

  /// One page of `table`, newest first. Pages are 1-based.
  pub async fn list<T: DeserializeOwned>(&self, table: Table, page: u32, page_size: u32) -> Result<Page<T>> {
    self.list_filtered(table, None, page, page_size).await
  }

  /// One page of the rows of `table` whose `column` equals `value`.
  pub async fn list_where<T: DeserializeOwned>(
    &self,
    table: Table,
    column: &str,
    value: &str,
    page: u32,
    page_size: u32,
  ) -> Result<Page<T>> {
    self
      .list_filtered(table, Some((column, value)), page, page_size)
      .await
  }

  async fn list_filtered<T: DeserializeOwned>(
    &self,
    table: Table,
    filter: Option<(&str, &str)>,
    page: u32,
    page_size: u32,
  ) -> Result<Page<T>> {
    let (offset, limit) = page_window(page, page_size);
    let mut params = vec![
      ("select".to_string(), "*".to_string()),
      ("order".to_string(), table.order().to_string()),
      ("offset".to_string(), offset.to_string()),
      ("limit".to_string(), limit.to_string()),
    ];
    if let Some((column, value)) = filter {
      params.push((column.to_string(), format!("eq.{}", value)));
    }
    let request = self.http.get(self.endpoint(table)?).query(&params);

    let response = send(self.authorized(request), "list", table).await?;
    let rows: Vec<T> = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse {}: {}", table.name(), e))?;

    Ok(split_page(rows, page_size))
  }

  /// Every row of `table`, newest first.
  pub async fn fetch_all<T: DeserializeOwned>(&self, table: Table) -> Result<Vec<T>> {
    let request = self
      .http
      .get(self.endpoint(table)?)
      .query(&[("select", "*"), ("order", table.order())]);

    let response = send(self.authorized(request), "fetch", table).await?;
    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse {}: {}", table.name(), e))
  }

  /// Rows of `table` whose `column` equals `value`, newest first.
  pub async fn fetch_where<T: DeserializeOwned>(&self, table: Table, column: &str, value: &str) -> Result<Vec<T>> {
    let request = self.http.get(self.endpoint(table)?).query(&[
      ("select", "*".to_string()),
      ("order", table.order().to_string()),
      (column, format!("eq.{}", value)),
    ]);

    let response = send(self.authorized(request), "fetch", table).await?;
    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse {}: {}", table.name(), e))
  }

  /// Insert `row` and return it as stored.
  pub async fn insert<B, T>(&self, table: Table, row: &B) -> Result<T>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let request = self
      .http
      .post(self.endpoint(table)?)
      .header("Prefer", "return=representation")
      .json(row);

    let response = send(self.authorized(request), "insert into", table).await?;
    single_row(response, table).await
  }

  /// Apply `patch` to the row with `id` and return the updated row.
  pub async fn update<P, T>(&self, table: Table, id: &str, patch: &P) -> Result<T>
  where
    P: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let request = self
      .http
      .patch(self.endpoint(table)?)
      .query(&[("id", format!("eq.{}", id))])
      .header("Prefer", "return=representation")
      .json(patch);

    let response = send(self.authorized(request), "update", table).await?;
    single_row(response, table).await
  }

  pub async fn delete(&self, table: Table, id: &str) -> Result<()> {
    let request = self
      .http
      .delete(self.endpoint(table)?)
      .query(&[("id", format!("eq.{}", id))]);

    send(self.authorized(request), "delete from", table).await?;
    Ok(())
  }

  /// Whether the backend answers at all.
  pub async fn ping(&self) -> Result<()> {
    let response = self
      .authorized(self.http.head(self.base.clone()))
      .send()
      .await
      .map_err(|e| eyre!("Backend unreachable: {}", e))?;

    if response.status().is_server_error() {
      return Err(eyre!("Backend unavailable: HTTP {}", response.status()));
    }
    Ok(())
  }
}

async fn send(request: RequestBuilder, action: &str, table: Table) -> Result<Response> {
  let response = request
    .send()
    .await
    .map_err(|e| eyre!("Failed to {} {}: {}", action, table.name(), e))?;

  let status = response.status();
  if !status.is_success() {
    let body = response.text().await.unwrap_or_default();
    return Err(eyre!(
      "Failed to {} {}: HTTP {}: {}",
      action,
      table.name(),
      status,
      body
    ));
  }
  Ok(response)
}

async fn single_row<T: DeserializeOwned>(response: Response, table: Table) -> Result<T> {
  let mut rows: Vec<T> = response
    .json()
    .await
    .map_err(|e| eyre!("Failed to parse {}: {}", table.name(), e))?;

  if rows.is_empty() {
    return Err(eyre!("No {} row returned", table.name()));
  }
  Ok(rows.swap_remove(0))
}

/// Base URL of the table endpoints, always ending in `/` so joins append.
fn table_base(url: &str, schema_path: &str) -> Result<Url> {
  let mut root = Url::parse(url).map_err(|e| eyre!("Invalid backend url {}: {}", url, e))?;
  if !root.path().ends_with('/') {
    let path = format!("{}/", root.path());
    root.set_path(&path);
  }

  let schema = format!("{}/", schema_path.trim_matches('/'));
  root
    .join(&schema)
    .map_err(|e| eyre!("Invalid schema path {}: {}", schema_path, e))
}

/// Offset and limit for a 1-based page. One extra row is requested to learn
/// whether another page exists.
fn page_window(page: u32, page_size: u32) -> (u64, u64) {
  let offset = u64::from(page.saturating_sub(1)) * u64::from(page_size);
  (offset, u64::from(page_size) + 1)
}

fn split_page<T>(mut rows: Vec<T>, page_size: u32) -> Page<T> {
  let has_more = rows.len() > page_size as usize;
  rows.truncate(page_size as usize);
  Page {
    items: rows,
    has_more,
  }
}
