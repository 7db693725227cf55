//! Scriptable in-memory brokerage for unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::{ApiError, Brokerage, LoginRequest, ReadOperation};
use crate::auth::{Credentials, TokenBlob};

pub const USERNAME: &str = "user@example.com";
pub const PASSWORD: &str = "hunter2";

pub fn credentials(totp_secret: Option<&str>) -> Credentials {
    Credentials::new(USERNAME, PASSWORD, totp_secret.map(str::to_string))
}

#[derive(Default)]
pub struct MockBrokerage {
    logins: AtomicUsize,
    probes: AtomicUsize,
    reads: AtomicUsize,
    login_delay: Duration,
    read_delay: Duration,
    login_failure: Mutex<Option<ApiError>>,
    probe_failure: Mutex<Option<ApiError>>,
    accepted: Mutex<HashSet<Vec<u8>>>,
    mfa_codes: Mutex<Vec<Option<String>>>,
    previous_tokens: Mutex<Vec<Option<TokenBlob>>>,
    scripted_reads: Mutex<VecDeque<Result<Value, ApiError>>>,
    operations: Mutex<Vec<ReadOperation>>,
}

impl MockBrokerage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = delay;
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Responses returned, in order, before falling back to fixtures.
    pub fn script_reads(&self, responses: Vec<Result<Value, ApiError>>) {
        self.scripted_reads.lock().unwrap().extend(responses);
    }

    pub fn accept_token(&self, token: &TokenBlob) {
        self.accepted.lock().unwrap().insert(token.as_bytes().to_vec());
    }

    pub fn fail_logins(&self, error: ApiError) {
        *self.login_failure.lock().unwrap() = Some(error);
    }

    pub fn allow_logins(&self) {
        *self.login_failure.lock().unwrap() = None;
    }

    /// Probes fail with `error` even for accepted tokens.
    pub fn fail_probes(&self, error: ApiError) {
        *self.probe_failure.lock().unwrap() = Some(error);
    }

    pub fn allow_probes(&self) {
        *self.probe_failure.lock().unwrap() = None;
    }

    pub fn login_count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn mfa_codes(&self) -> Vec<Option<String>> {
        self.mfa_codes.lock().unwrap().clone()
    }

    /// Token of the session each login replaced, in call order.
    pub fn previous_tokens(&self) -> Vec<Option<TokenBlob>> {
        self.previous_tokens.lock().unwrap().clone()
    }

    pub fn operations(&self) -> Vec<ReadOperation> {
        self.operations.lock().unwrap().clone()
    }

    fn fixture(operation: &ReadOperation) -> Result<Value, ApiError> {
        Ok(match operation {
            ReadOperation::PortfolioProfile => json!({
                "equity": "10250.32",
                "extended_hours_equity": "10248.10",
                "withdrawable_amount": "512.00"
            }),
            ReadOperation::Holdings => json!({
                "AAPL": {"quantity": "10.00000000", "average_buy_price": "150.0000", "price": "189.50"}
            }),
            ReadOperation::Watchlist { name } if name == "Default" => json!([
                {"symbol": "AAPL", "object_type": "instrument"},
                {"symbol": "MSFT", "object_type": "instrument"}
            ]),
            ReadOperation::Watchlist { name } => {
                return Err(ApiError::NotFound(format!("No watchlist named '{}'", name)))
            }
            ReadOperation::Quote { symbol } if symbol.as_str() == "ZZZZ" => json!([]),
            ReadOperation::Quote { symbol } => json!([{
                "symbol": symbol.as_str(),
                "last_trade_price": "189.50",
                "bid_price": "189.45",
                "ask_price": "189.55",
                "trading_halted": false
            }]),
            ReadOperation::Fundamentals { symbol } => json!([{
                "symbol": symbol.as_str(),
                "pe_ratio": "29.4",
                "market_cap": "2950000000000.00",
                "volume": "51234000"
            }]),
            ReadOperation::Historicals { symbol, .. } => json!([
                {"symbol": symbol.as_str(), "begins_at": "2026-09-01T00:00:00Z", "open_price": "180.00", "close_price": "182.00", "volume": 100},
                {"symbol": symbol.as_str(), "begins_at": "2026-09-02T00:00:00Z", "open_price": "182.00", "close_price": "185.00", "volume": 120}
            ]),
            ReadOperation::News { symbol } => json!([
                {"title": format!("{} beats estimates", symbol), "url": "https://example.com/a", "source": "Wire"}
            ]),
            ReadOperation::Earnings { .. } => json!([
                {"year": 2026, "quarter": 3, "eps": {"estimate": "1.40", "actual": "1.46"}}
            ]),
            ReadOperation::Ratings { .. } => json!({
                "summary": {"num_buy_ratings": 30, "num_hold_ratings": 8, "num_sell_ratings": 2}
            }),
            ReadOperation::Dividends => json!([{"amount": "2.40", "payable_date": "2026-08-14"}]),
            ReadOperation::OptionPositions => json!([
                {"chain_symbol": "AAPL", "type": "long", "quantity": "1.0000"}
            ]),
            ReadOperation::InstrumentsBySymbol { symbol } if symbol.as_str() == "AAPL" => {
                json!([{"symbol": "AAPL", "simple_name": "Apple"}])
            }
            ReadOperation::InstrumentsBySymbol { .. } => json!([]),
            ReadOperation::SearchInstruments { .. } => json!([
                {"symbol": "AAPL", "simple_name": "Apple"},
                {"symbol": "APLE", "simple_name": "Apple Hospitality"}
            ]),
        })
    }
}

#[async_trait]
impl Brokerage for MockBrokerage {
    async fn login(&self, request: &LoginRequest<'_>) -> Result<TokenBlob, ApiError> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        self.mfa_codes.lock().unwrap().push(request.mfa_code.clone());
        self.previous_tokens.lock().unwrap().push(request.previous.cloned());
        if !self.login_delay.is_zero() {
            tokio::time::sleep(self.login_delay).await;
        }
        if let Some(error) = self.login_failure.lock().unwrap().clone() {
            return Err(error);
        }
        let token = TokenBlob::new(format!("token-{}", n).into_bytes());
        self.accept_token(&token);
        Ok(token)
    }

    async fn probe(&self, token: &TokenBlob) -> Result<(), ApiError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.probe_failure.lock().unwrap().clone() {
            return Err(error);
        }
        if self.accepted.lock().unwrap().contains(token.as_bytes()) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }

    async fn read(&self, _token: &TokenBlob, operation: &ReadOperation) -> Result<Value, ApiError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.operations.lock().unwrap().push(operation.clone());
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        let scripted = self.scripted_reads.lock().unwrap().pop_front();
        match scripted {
            Some(response) => response,
            None => Self::fixture(operation),
        }
    }
}
