//! API client for the Robinhood REST API.
//!
//! This module provides the `ApiClient` struct, the HTTP implementation of
//! [`Brokerage`]. It only ever issues GET requests for data; the single POST
//! is the OAuth password grant used to log in.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::TokenBlob;

use super::{ApiError, Brokerage, LoginRequest, ReadOperation};

// ============================================================================
// Constants
// ============================================================================

/// Base URL for all API endpoints
const API_BASE_URL: &str = "https://api.robinhood.com";

/// Public OAuth client id used by the Robinhood web and mobile apps
const OAUTH_CLIENT_ID: &str = "c82SH0WZOsabOXGP2sxqcj34FxkvfnWRZBKlBjFS";

/// Requested token lifetime in seconds (one day)
const TOKEN_EXPIRES_IN_SECS: u64 = 86_400;

/// Upper bound on `next` links followed for paginated endpoints
const MAX_PAGES: usize = 10;

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_type: Option<String>,
    #[serde(default)]
    mfa_required: bool,
    detail: Option<String>,
}

/// What `ApiClient` stores inside the opaque session blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    token_type: String,
    device_token: String,
    issued_at: DateTime<Utc>,
}

impl StoredToken {
    fn from_blob(blob: &TokenBlob) -> Result<Self, ApiError> {
        // A blob we cannot decode is as good as an expired one
        serde_json::from_slice(blob.as_bytes()).map_err(|_| ApiError::Unauthorized)
    }

    fn to_blob(&self) -> Result<TokenBlob, ApiError> {
        serde_json::to_vec(self)
            .map(TokenBlob::new)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode session: {}", e)))
    }

    fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// API client for Robinhood.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    /// Device id for logins that have no earlier token to take one from
    device_token: String,
}

impl ApiClient {
    /// Create a new API client with a bounded request timeout
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        Self::with_base_url(API_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            device_token: Uuid::new_v4().to_string(),
        })
    }

    /// The device id recorded in `previous`, or this client's own.
    fn device_token_for(&self, previous: Option<&TokenBlob>) -> String {
        previous
            .and_then(|blob| StoredToken::from_blob(blob).ok())
            .map(|stored| stored.device_token)
            .filter(|token| !token.is_empty())
            .unwrap_or_else(|| self.device_token.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn get(&self, token: &StoredToken, url: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        let response = self
            .client
            .get(url)
            .header(header::AUTHORIZATION, token.authorization())
            .header(header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Ok(response.json().await?)
    }

    /// GET a paginated endpoint and concatenate every page's `results`.
    async fn get_paginated(
        &self,
        token: &StoredToken,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        let mut page = self.get(token, &self.url(path), query).await?;
        let mut results = take_results(&mut page);

        let mut pages = 1;
        while let Some(next) = page.get("next").and_then(Value::as_str).map(str::to_string) {
            if pages >= MAX_PAGES {
                warn!(path, pages, "Stopping pagination early");
                break;
            }
            page = self.get(token, &next, &[]).await?;
            results.extend(take_results(&mut page));
            pages += 1;
        }

        debug!(path, pages, count = results.len(), "Fetched paginated results");
        Ok(Value::Array(results))
    }

    /// GET `/quotes/` or `/fundamentals/` for a single symbol, dropping the
    /// `null` placeholders the API returns for unknown tickers.
    async fn get_by_symbols(&self, token: &StoredToken, path: &str, symbols: &str) -> Result<Value, ApiError> {
        let mut body = self.get(token, &self.url(path), &[("symbols", symbols)]).await?;
        let results: Vec<Value> = take_results(&mut body)
            .into_iter()
            .filter(|v| !v.is_null())
            .collect();
        Ok(Value::Array(results))
    }

    async fn fetch_portfolio_profile(&self, token: &StoredToken) -> Result<Value, ApiError> {
        let mut body = self.get(token, &self.url("/portfolios/"), &[]).await?;
        take_results(&mut body)
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound("No portfolio found for this account".to_string()))
    }

    /// Positions merged with instrument symbols and current quotes.
    async fn fetch_holdings(&self, token: &StoredToken) -> Result<Value, ApiError> {
        let positions = self
            .get_paginated(token, "/positions/", &[("nonzero", "true")])
            .await?;
        let positions = positions.as_array().cloned().unwrap_or_default();

        let mut by_symbol: Vec<(String, Value)> = Vec::with_capacity(positions.len());
        for position in positions {
            let Some(instrument_url) = position.get("instrument").and_then(Value::as_str) else {
                continue;
            };
            let instrument = self.get(token, instrument_url, &[]).await?;
            let symbol = match instrument.get("symbol").and_then(Value::as_str) {
                Some(s) => s.to_string(),
                None => continue,
            };
            let mut entry = Map::new();
            entry.insert("quantity".into(), field(&position, "quantity"));
            entry.insert("average_buy_price".into(), field(&position, "average_buy_price"));
            entry.insert("name".into(), field(&instrument, "simple_name"));
            entry.insert("id".into(), field(&instrument, "id"));
            by_symbol.push((symbol, Value::Object(entry)));
        }

        if by_symbol.is_empty() {
            return Ok(Value::Object(Map::new()));
        }

        let symbols: Vec<&str> = by_symbol.iter().map(|(s, _)| s.as_str()).collect();
        let quotes = self.get_by_symbols(token, "/quotes/", &symbols.join(",")).await?;
        let prices: HashMap<String, f64> = quotes
            .as_array()
            .map(|qs| {
                qs.iter()
                    .filter_map(|q| {
                        let symbol = q.get("symbol")?.as_str()?.to_string();
                        let price = number(q, "last_trade_price")?;
                        Some((symbol, price))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut holdings = Map::new();
        for (symbol, mut entry) in by_symbol {
            let quantity = number(&entry, "quantity").unwrap_or(0.0);
            let average = number(&entry, "average_buy_price").unwrap_or(0.0);
            if let (Some(&price), Value::Object(map)) = (prices.get(&symbol), &mut entry) {
                let equity = price * quantity;
                map.insert("price".into(), json!(format!("{:.2}", price)));
                map.insert("equity".into(), json!(format!("{:.2}", equity)));
                map.insert(
                    "equity_change".into(),
                    json!(format!("{:.2}", equity - average * quantity)),
                );
                if average > 0.0 {
                    map.insert(
                        "percent_change".into(),
                        json!(format!("{:.2}", (price - average) / average * 100.0)),
                    );
                }
            }
            holdings.insert(symbol, entry);
        }
        Ok(Value::Object(holdings))
    }

    async fn fetch_watchlist(&self, token: &StoredToken, name: &str) -> Result<Value, ApiError> {
        let lists = self
            .get_paginated(token, "/midlands/lists/default/", &[])
            .await?;
        let list_id = lists
            .as_array()
            .into_iter()
            .flatten()
            .find(|list| list.get("display_name").and_then(Value::as_str) == Some(name))
            .and_then(|list| list.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| ApiError::NotFound(format!("No watchlist named '{}'", name)))?;

        self.get_paginated(token, "/midlands/lists/items/", &[("list_id", list_id.as_str())])
            .await
    }

    async fn fetch_historicals(
        &self,
        token: &StoredToken,
        symbol: &str,
        interval: &str,
        span: &str,
    ) -> Result<Value, ApiError> {
        let bounds = if span == "day" { "extended" } else { "regular" };
        let mut body = self
            .get(
                token,
                &self.url("/marketdata/historicals/"),
                &[
                    ("symbols", symbol),
                    ("interval", interval),
                    ("span", span),
                    ("bounds", bounds),
                ],
            )
            .await?;

        let points = take_results(&mut body)
            .into_iter()
            .find(|r| !r.is_null())
            .and_then(|mut r| r.get_mut("historicals").map(Value::take))
            .unwrap_or_else(|| Value::Array(Vec::new()));

        // Tag each point with its symbol
        let points = match points {
            Value::Array(items) => items
                .into_iter()
                .map(|mut p| {
                    if let Value::Object(ref mut map) = p {
                        map.insert("symbol".into(), json!(symbol));
                    }
                    p
                })
                .collect(),
            _ => Vec::new(),
        };
        Ok(Value::Array(points))
    }

    async fn fetch_ratings(&self, token: &StoredToken, symbol: &str) -> Result<Value, ApiError> {
        let instruments = self
            .get_paginated(token, "/instruments/", &[("symbol", symbol)])
            .await?;
        let id = instruments
            .as_array()
            .and_then(|items| items.first())
            .and_then(|i| i.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| ApiError::NotFound(format!("No instrument for symbol: {}", symbol)))?;

        self.get(token, &self.url(&format!("/midlands/ratings/{}/", id)), &[])
            .await
    }
}

#[async_trait]
impl Brokerage for ApiClient {
    async fn login(&self, request: &LoginRequest<'_>) -> Result<TokenBlob, ApiError> {
        let device_token = self.device_token_for(request.previous);
        let mut form = json!({
            "client_id": OAUTH_CLIENT_ID,
            "expires_in": TOKEN_EXPIRES_IN_SECS,
            "grant_type": "password",
            "scope": "internal",
            "username": request.username,
            "password": request.password,
            "device_token": &device_token,
        });
        if let Some(ref code) = request.mfa_code {
            form["mfa_code"] = json!(code);
        }

        let response = self
            .client
            .post(self.url("/oauth2/token/"))
            .header(header::ACCEPT, "application/json")
            .json(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let granted = grant_from_response(status, &body, request.mfa_code.is_some())?;
        debug!("Password grant accepted");

        StoredToken {
            access_token: granted.access_token,
            refresh_token: granted.refresh_token,
            token_type: granted.token_type,
            device_token,
            issued_at: Utc::now(),
        }
        .to_blob()
    }

    async fn probe(&self, token: &TokenBlob) -> Result<(), ApiError> {
        let token = StoredToken::from_blob(token)?;
        self.get(&token, &self.url("/accounts/"), &[]).await?;
        Ok(())
    }

    async fn read(&self, token: &TokenBlob, operation: &ReadOperation) -> Result<Value, ApiError> {
        let token = StoredToken::from_blob(token)?;
        debug!(operation = operation.name(), "Upstream read");

        match operation {
            ReadOperation::PortfolioProfile => self.fetch_portfolio_profile(&token).await,
            ReadOperation::Holdings => self.fetch_holdings(&token).await,
            ReadOperation::Watchlist { name } => self.fetch_watchlist(&token, name).await,
            ReadOperation::Quote { symbol } => {
                self.get_by_symbols(&token, "/quotes/", symbol.as_str()).await
            }
            ReadOperation::Fundamentals { symbol } => {
                self.get_by_symbols(&token, "/fundamentals/", symbol.as_str()).await
            }
            ReadOperation::Historicals { symbol, interval, span } => {
                self.fetch_historicals(&token, symbol.as_str(), interval.as_str(), span.as_str())
                    .await
            }
            ReadOperation::News { symbol } => {
                self.get_paginated(&token, &format!("/midlands/news/{}/", symbol), &[])
                    .await
            }
            ReadOperation::Earnings { symbol } => {
                self.get_paginated(&token, "/marketdata/earnings/", &[("symbol", symbol.as_str())])
                    .await
            }
            ReadOperation::Ratings { symbol } => self.fetch_ratings(&token, symbol.as_str()).await,
            ReadOperation::Dividends => self.get_paginated(&token, "/dividends/", &[]).await,
            ReadOperation::OptionPositions => {
                self.get_paginated(&token, "/options/positions/", &[("nonzero", "True")])
                    .await
            }
            ReadOperation::InstrumentsBySymbol { symbol } => {
                self.get_paginated(&token, "/instruments/", &[("symbol", symbol.as_str())])
                    .await
            }
            ReadOperation::SearchInstruments { query } => {
                self.get_paginated(&token, "/instruments/", &[("query", query.as_str())])
                    .await
            }
        }
    }
}

/// Token fields from an accepted password grant.
#[derive(Debug, PartialEq, Eq)]
struct Grant {
    access_token: String,
    refresh_token: Option<String>,
    token_type: String,
}

/// Decide what a `/oauth2/token/` response means.
///
/// 400 and 401 carry a JSON body explaining the rejection, so only 429 and
/// 5xx are mapped from the status alone.
fn grant_from_response(status: reqwest::StatusCode, body: &str, sent_mfa: bool) -> Result<Grant, ApiError> {
    if status.as_u16() == 429 || status.is_server_error() {
        return Err(ApiError::from_status(status, body));
    }

    let parsed: TokenResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) if status.is_success() => {
            return Err(ApiError::InvalidResponse(format!(
                "unreadable login response: {}",
                ApiError::truncate_body(body)
            )))
        }
        Err(_) => TokenResponse::default(),
    };

    if parsed.mfa_required {
        return Err(ApiError::MfaRequired(
            "account requires a two-factor code; set ROBINHOOD_TOTP_SECRET".to_string(),
        ));
    }

    match parsed.access_token {
        Some(access_token) if status.is_success() => Ok(Grant {
            access_token,
            refresh_token: parsed.refresh_token,
            token_type: parsed.token_type.unwrap_or_else(|| "Bearer".to_string()),
        }),
        _ => {
            let detail = parsed
                .detail
                .unwrap_or_else(|| format!("login returned status {}", status));
            let detail = ApiError::truncate_body(&detail);
            if sent_mfa && detail.to_lowercase().contains("mfa") {
                Err(ApiError::MfaRequired(detail))
            } else {
                Err(ApiError::LoginRejected(detail))
            }
        }
    }
}

/// Remove and return the `results` array of a paged response.
fn take_results(body: &mut Value) -> Vec<Value> {
    match body.get_mut("results").map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn field(value: &Value, name: &str) -> Value {
    value.get(name).cloned().unwrap_or(Value::Null)
}

/// Robinhood returns decimals as strings; accept either form.
fn number(value: &Value, name: &str) -> Option<f64> {
    match value.get(name)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
