//! Tool dispatch: argument validation, operation selection and payload shaping.
//!
//! `ToolDispatcher` is the entry point for the tool-invocation boundary. A
//! request is parsed into a [`ToolRequest`] (failing fast, before any
//! network access) whose operation comes from the closed [`ReadOperation`]
//! set, then executed through the [`SafeCaller`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::api::{ApiError, Brokerage, ReadOperation};
use crate::auth::{Session, SessionManager};

use super::args::{optional_str, parse_or_default, required_str, ArgumentError, Symbol};
use super::catalog::ToolId;
use super::result::{ErrorKind, Payload, ToolResult};
use super::safe_call::SafeCaller;

/// Watchlist used when no name is given
const DEFAULT_WATCHLIST: &str = "Default";

/// A validated tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    tool: ToolId,
    operation: ReadOperation,
}

impl ToolRequest {
    pub fn parse(tool: &str, args: &Map<String, Value>) -> Result<Self, ArgumentError> {
        let tool = ToolId::from_name(tool).ok_or_else(|| ArgumentError::UnknownTool(tool.to_string()))?;

        let operation = match tool {
            ToolId::GetPortfolio => ReadOperation::PortfolioProfile,
            ToolId::GetPositions => ReadOperation::Holdings,
            ToolId::GetWatchlist => {
                let name = match optional_str(args, "name")? {
                    None => DEFAULT_WATCHLIST,
                    Some(_) => required_str(args, "name")?,
                };
                ReadOperation::Watchlist {
                    name: name.to_string(),
                }
            }
            ToolId::GetQuote => ReadOperation::Quote {
                symbol: symbol(args)?,
            },
            ToolId::GetFundamentals => ReadOperation::Fundamentals {
                symbol: symbol(args)?,
            },
            ToolId::GetHistoricals => ReadOperation::Historicals {
                symbol: symbol(args)?,
                interval: parse_or_default(args, "interval")?,
                span: parse_or_default(args, "span")?,
            },
            ToolId::GetNews => ReadOperation::News {
                symbol: symbol(args)?,
            },
            ToolId::GetEarnings => ReadOperation::Earnings {
                symbol: symbol(args)?,
            },
            ToolId::GetRatings => ReadOperation::Ratings {
                symbol: symbol(args)?,
            },
            ToolId::GetDividends => ReadOperation::Dividends,
            ToolId::GetOptionsPositions => ReadOperation::OptionPositions,
            ToolId::SearchSymbols => ReadOperation::SearchInstruments {
                query: required_str(args, "query")?.to_string(),
            },
        };

        Ok(Self { tool, operation })
    }

    pub fn tool(&self) -> ToolId {
        self.tool
    }

    pub fn operation(&self) -> &ReadOperation {
        &self.operation
    }
}

fn symbol(args: &Map<String, Value>) -> Result<Symbol, ArgumentError> {
    required_str(args, "symbol")?.parse()
}

pub struct ToolDispatcher {
    client: Arc<dyn Brokerage>,
    caller: SafeCaller,
}

impl ToolDispatcher {
    pub fn new(client: Arc<dyn Brokerage>, sessions: Arc<SessionManager>, timeout: Duration) -> Self {
        Self {
            client,
            caller: SafeCaller::new(sessions, timeout),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.caller.sessions()
    }

    /// Validate and run one tool invocation. Never fails: every problem is
    /// reported as a `ToolResult::Failure`.
    pub async fn invoke(&self, tool: &str, arguments: &Map<String, Value>) -> ToolResult {
        match ToolRequest::parse(tool, arguments) {
            Ok(request) => self.dispatch(&request).await,
            Err(e) => {
                debug!(tool, error = %e, "Rejected tool arguments");
                ToolResult::failure(ErrorKind::UnknownError, format!("Invalid request: {}", e))
            }
        }
    }

    pub async fn dispatch(&self, request: &ToolRequest) -> ToolResult {
        info!(tool = %request.tool(), "Invoking tool");
        let client = self.client.as_ref();
        self.caller
            .call(|session| execute(client, session, request))
            .await
    }
}

async fn execute(
    client: &dyn Brokerage,
    session: Arc<Session>,
    request: &ToolRequest,
) -> Result<Payload, ApiError> {
    let token = session.token();
    match request.operation() {
        ReadOperation::Quote { symbol } => quote(client, &session, symbol).await,
        ReadOperation::SearchInstruments { query } => search(client, &session, query).await,
        operation => {
            let value = client.read(token, operation).await?;
            shape(operation, value)
        }
    }
}

/// Quote plus the day's `volume`, which the quotes endpoint does not carry.
async fn quote(client: &dyn Brokerage, session: &Session, symbol: &Symbol) -> Result<Payload, ApiError> {
    let operation = ReadOperation::Quote {
        symbol: symbol.clone(),
    };
    let value = client.read(session.token(), &operation).await?;
    let mut quote = shape(&operation, value)?;
    if quote.contains_key("volume") {
        return Ok(quote);
    }

    let fundamentals = ReadOperation::Fundamentals {
        symbol: symbol.clone(),
    };
    let volume = match client.read(session.token(), &fundamentals).await {
        Ok(value) => first_object(value)
            .and_then(|mut row| row.remove("volume"))
            .unwrap_or(Value::Null),
        Err(e) if e.is_expired_session() => return Err(e),
        Err(e) => {
            debug!(error = %e, symbol = %symbol, "No fundamentals, quote has no volume");
            Value::Null
        }
    };
    quote.insert("volume".to_string(), volume);
    Ok(quote)
}

/// Exact ticker match first, then free-text search.
async fn search(client: &dyn Brokerage, session: &Session, query: &str) -> Result<Payload, ApiError> {
    if let Ok(symbol) = query.parse::<Symbol>() {
        let exact = ReadOperation::InstrumentsBySymbol { symbol };
        match client.read(session.token(), &exact).await {
            Ok(Value::Array(items)) if !items.is_empty() => {
                return Ok(list_payload(Value::Array(items), &[("query", json!(query))]));
            }
            Ok(_) => {}
            // An expired session has to reach the safe-call wrapper
            Err(e) if e.is_expired_session() => return Err(e),
            Err(e) => debug!(error = %e, "Exact symbol lookup failed, searching instead"),
        }
    }

    let operation = ReadOperation::SearchInstruments {
        query: query.to_string(),
    };
    let value = client.read(session.token(), &operation).await?;
    shape(&operation, value)
}

/// Turn a raw upstream value into the payload mapping for its operation.
fn shape(operation: &ReadOperation, value: Value) -> Result<Payload, ApiError> {
    match operation {
        ReadOperation::Quote { symbol } => {
            let mut quote = first_object(value)
                .ok_or_else(|| ApiError::NotFound(format!("No quote found for symbol: {}", symbol)))?;
            if !quote.contains_key("price") {
                if let Some(price) = quote.get("last_trade_price").cloned() {
                    quote.insert("price".to_string(), price);
                }
            }
            Ok(quote)
        }
        ReadOperation::Fundamentals { symbol } => first_object(value).ok_or_else(|| {
            ApiError::NotFound(format!("No fundamentals found for symbol: {}", symbol))
        }),
        ReadOperation::Ratings { symbol } => match value {
            Value::Object(ratings) => Ok(ratings),
            _ => Err(ApiError::NotFound(format!("No ratings found for symbol: {}", symbol))),
        },
        ReadOperation::PortfolioProfile | ReadOperation::Holdings => match value {
            Value::Object(map) => Ok(map),
            Value::Null => Err(ApiError::InvalidResponse(
                "API returned no data - you may need to login first".to_string(),
            )),
            _ => Err(ApiError::InvalidResponse(format!(
                "expected an object for {}",
                operation.name()
            ))),
        },
        ReadOperation::Watchlist { name } => Ok(list_payload(value, &[("name", json!(name))])),
        ReadOperation::Historicals { symbol, interval, span } => Ok(list_payload(
            value,
            &[
                ("symbol", json!(symbol.as_str())),
                ("interval", json!(interval.as_str())),
                ("span", json!(span.as_str())),
            ],
        )),
        ReadOperation::News { symbol } | ReadOperation::Earnings { symbol } => {
            Ok(list_payload(value, &[("symbol", json!(symbol.as_str()))]))
        }
        ReadOperation::Dividends | ReadOperation::OptionPositions => Ok(list_payload(value, &[])),
        ReadOperation::InstrumentsBySymbol { symbol } => {
            Ok(list_payload(value, &[("query", json!(symbol.as_str()))]))
        }
        ReadOperation::SearchInstruments { query } => Ok(list_payload(value, &[("query", json!(query))])),
    }
}

fn first_object(value: Value) -> Option<Payload> {
    match value {
        Value::Array(items) => items.into_iter().find_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        }),
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// `{"results": [...], "count": n}` plus context fields. Anything that is not
/// a list is reported as an empty one.
fn list_payload(value: Value, context: &[(&str, Value)]) -> Payload {
    let results = match value {
        Value::Array(items) => items,
        _ => Vec::new(),
    };
    let mut payload = Map::new();
    for (key, value) in context {
        payload.insert((*key).to_string(), value.clone());
    }
    payload.insert("count".to_string(), json!(results.len()));
    payload.insert("results".to_string(), Value::Array(results));
    payload
}
