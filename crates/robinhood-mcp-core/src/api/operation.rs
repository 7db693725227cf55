//! The closed set of upstream reads.
//!
//! Every request the brokerage client can make is a variant of
//! [`ReadOperation`]. Orders, transfers and other account mutations have no
//! variant, so nothing above the client can ask for one.

use crate::tools::args::{Interval, Span, Symbol};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOperation {
    /// Portfolio profile: equity, extended hours equity, withdrawable amount
    PortfolioProfile,
    /// Open stock positions keyed by symbol
    Holdings,
    Watchlist { name: String },
    Quote { symbol: Symbol },
    Fundamentals { symbol: Symbol },
    Historicals { symbol: Symbol, interval: Interval, span: Span },
    News { symbol: Symbol },
    Earnings { symbol: Symbol },
    Ratings { symbol: Symbol },
    Dividends,
    OptionPositions,
    /// Exact instrument lookup by ticker
    InstrumentsBySymbol { symbol: Symbol },
    /// Free-text instrument search
    SearchInstruments { query: String },
}

impl ReadOperation {
    /// Short name for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            ReadOperation::PortfolioProfile => "portfolio_profile",
            ReadOperation::Holdings => "holdings",
            ReadOperation::Watchlist { .. } => "watchlist",
            ReadOperation::Quote { .. } => "quote",
            ReadOperation::Fundamentals { .. } => "fundamentals",
            ReadOperation::Historicals { .. } => "historicals",
            ReadOperation::News { .. } => "news",
            ReadOperation::Earnings { .. } => "earnings",
            ReadOperation::Ratings { .. } => "ratings",
            ReadOperation::Dividends => "dividends",
            ReadOperation::OptionPositions => "option_positions",
            ReadOperation::InstrumentsBySymbol { .. } => "instruments_by_symbol",
            ReadOperation::SearchInstruments { .. } => "search_instruments",
        }
    }
}
