//! The twelve read-only research tools.

use std::fmt;

/// Prefix every public tool id carries
const TOOL_PREFIX: &str = "robinhood_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolId {
    GetPortfolio,
    GetPositions,
    GetWatchlist,
    GetQuote,
    GetFundamentals,
    GetHistoricals,
    GetNews,
    GetEarnings,
    GetRatings,
    GetDividends,
    GetOptionsPositions,
    SearchSymbols,
}

impl ToolId {
    pub const ALL: [ToolId; 12] = [
        ToolId::GetPortfolio,
        ToolId::GetPositions,
        ToolId::GetWatchlist,
        ToolId::GetQuote,
        ToolId::GetFundamentals,
        ToolId::GetHistoricals,
        ToolId::GetNews,
        ToolId::GetEarnings,
        ToolId::GetRatings,
        ToolId::GetDividends,
        ToolId::GetOptionsPositions,
        ToolId::SearchSymbols,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolId::GetPortfolio => "robinhood_get_portfolio",
            ToolId::GetPositions => "robinhood_get_positions",
            ToolId::GetWatchlist => "robinhood_get_watchlist",
            ToolId::GetQuote => "robinhood_get_quote",
            ToolId::GetFundamentals => "robinhood_get_fundamentals",
            ToolId::GetHistoricals => "robinhood_get_historicals",
            ToolId::GetNews => "robinhood_get_news",
            ToolId::GetEarnings => "robinhood_get_earnings",
            ToolId::GetRatings => "robinhood_get_ratings",
            ToolId::GetDividends => "robinhood_get_dividends",
            ToolId::GetOptionsPositions => "robinhood_get_options_positions",
            ToolId::SearchSymbols => "robinhood_search_symbols",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolId::GetPortfolio => {
                "Get current portfolio value and performance metrics (equity, extended hours equity, withdrawable amount)."
            }
            ToolId::GetPositions => {
                "Get all current stock positions with price, quantity, average buy price, equity and percent change."
            }
            ToolId::GetWatchlist => "Get stocks in a watchlist. Arguments: name (default \"Default\").",
            ToolId::GetQuote => {
                "Get a real-time quote (last trade price, bid, ask, previous close). Arguments: symbol."
            }
            ToolId::GetFundamentals => {
                "Get fundamentals (P/E ratio, market cap, dividend yield, 52-week range). Arguments: symbol."
            }
            ToolId::GetHistoricals => {
                "Get historical OHLCV prices. Arguments: symbol, interval (5minute, 10minute, hour, day, week; default day), span (day, week, month, 3month, year, 5year; default month)."
            }
            ToolId::GetNews => "Get recent news articles for a stock. Arguments: symbol.",
            ToolId::GetEarnings => {
                "Get earnings reports with EPS, report date and estimates. Arguments: symbol."
            }
            ToolId::GetRatings => "Get the analyst ratings summary for a stock. Arguments: symbol.",
            ToolId::GetDividends => "Get all dividend payments received.",
            ToolId::GetOptionsPositions => "Get all open options positions (read-only).",
            ToolId::SearchSymbols => {
                "Search for stock symbols by company name or ticker. Arguments: query."
            }
        }
    }

    /// Look up a tool by id. The `robinhood_` prefix is optional.
    pub fn from_name(name: &str) -> Option<ToolId> {
        let name = name.trim();
        let bare = name.strip_prefix(TOOL_PREFIX).unwrap_or(name);
        ToolId::ALL
            .into_iter()
            .find(|tool| &tool.name()[TOOL_PREFIX.len()..] == bare)
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
