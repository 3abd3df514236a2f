use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLC candle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Live bid/ask for a symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn is_valid(&self) -> bool {
        self.bid.is_finite() && self.ask.is_finite() && self.bid >= 0.0 && self.ask >= self.bid
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    /// Price paid to open a position on `side`
    pub fn entry_price(&self, side: TradeSide) -> f64 {
        match side {
            TradeSide::Buy => self.ask,
            TradeSide::Sell => self.bid,
        }
    }

    /// Price received when closing a position on `side` (bid for longs, ask for shorts)
    pub fn exit_price(&self, side: TradeSide) -> f64 {
        match side {
            TradeSide::Buy => self.bid,
            TradeSide::Sell => self.ask,
        }
    }
}

/// Direction voted by a strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
    None,
}

impl Direction {
    pub fn side(&self) -> Option<TradeSide> {
        match self {
            Direction::Buy => Some(TradeSide::Buy),
            Direction::Sell => Some(TradeSide::Sell),
            Direction::None => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
            Direction::None => "NONE",
        };
        f.write_str(s)
    }
}

/// Side of an open position or order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// +1 for longs, -1 for shorts
    pub fn sign(&self) -> f64 {
        match self {
            TradeSide::Buy => 1.0,
            TradeSide::Sell => -1.0,
        }
    }
}

/// Trading style, one signal generator each
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Scalping,
    Intraday,
    Arbitrage,
    Hft,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Scalping,
        StrategyKind::Intraday,
        StrategyKind::Arbitrage,
        StrategyKind::Hft,
    ];

    /// Bar granularity the signal generator runs on
    pub fn primary_timeframe(&self) -> Timeframe {
        match self {
            StrategyKind::Scalping => Timeframe::M1,
            StrategyKind::Intraday => Timeframe::M15,
            StrategyKind::Arbitrage => Timeframe::M5,
            StrategyKind::Hft => Timeframe::M1,
        }
    }

    /// Default take-profit and stop-loss distances in pips
    pub fn default_tp_sl_pips(&self) -> (f64, f64) {
        match self {
            StrategyKind::Scalping => (20.0, 10.0),
            StrategyKind::Intraday => (50.0, 25.0),
            StrategyKind::Arbitrage => (10.0, 5.0),
            StrategyKind::Hft => (5.0, 3.0),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::Scalping => "scalping",
            StrategyKind::Intraday => "intraday",
            StrategyKind::Arbitrage => "arbitrage",
            StrategyKind::Hft => "hft",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scalping" => Ok(StrategyKind::Scalping),
            "intraday" => Ok(StrategyKind::Intraday),
            "arbitrage" => Ok(StrategyKind::Arbitrage),
            "hft" => Ok(StrategyKind::Hft),
            other => Err(format!("unknown strategy '{}'", other)),
        }
    }
}

/// Bar granularity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.minutes())
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Instrument family, drives spread limits and size multipliers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SymbolClass {
    ForexMajor,
    JpyCross,
    GbpCross,
    Exotic,
    Metal,
    Crypto,
    Energy,
    Index,
}

const MAJOR_CURRENCIES: &[&str] = &["USD", "EUR", "CHF", "AUD", "CAD", "NZD"];
const METALS: &[&str] = &["XAU", "XAG", "XPT", "XPD"];
const CRYPTO: &[&str] = &["BTC", "ETH", "LTC", "XRP", "SOL"];
const ENERGY: &[&str] = &["OIL", "WTI", "BRENT", "NGAS"];
const INDICES: &[&str] = &[
    "US30", "US100", "US500", "NAS100", "SPX500", "GER40", "DE30", "DE40", "UK100", "JP225",
];

/// Uppercase symbol with any broker suffix removed ("eurusd.m" -> "EURUSD")
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .split(['.', '_', '-', '#'])
        .next()
        .unwrap_or(symbol)
        .to_ascii_uppercase()
}

impl SymbolClass {
    pub fn classify(symbol: &str) -> Self {
        let s = normalize_symbol(symbol);
        if METALS.iter().any(|m| s.starts_with(m)) {
            return SymbolClass::Metal;
        }
        if CRYPTO.iter().any(|c| s.contains(c)) {
            return SymbolClass::Crypto;
        }
        if ENERGY.iter().any(|e| s.contains(e)) {
            return SymbolClass::Energy;
        }
        if INDICES.iter().any(|i| s.starts_with(i)) {
            return SymbolClass::Index;
        }
        if s.contains("JPY") {
            return SymbolClass::JpyCross;
        }
        if s.contains("GBP") {
            return SymbolClass::GbpCross;
        }
        match currencies(&s) {
            Some((base, quote))
                if MAJOR_CURRENCIES.contains(&base) && MAJOR_CURRENCIES.contains(&quote) =>
            {
                SymbolClass::ForexMajor
            }
            _ => SymbolClass::Exotic,
        }
    }
}

/// Base and quote currency of a six-letter pair
pub fn currencies(symbol: &str) -> Option<(&str, &str)> {
    if symbol.len() >= 6 && symbol.is_char_boundary(3) && symbol.is_char_boundary(6) {
        let base = &symbol[0..3];
        let quote = &symbol[3..6];
        if base.chars().all(|c| c.is_ascii_alphabetic())
            && quote.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Some((base, quote));
        }
    }
    None
}

/// Currencies (or the bare instrument name) a symbol is exposed to
pub fn legs(symbol: &str) -> Vec<String> {
    let s = normalize_symbol(symbol);
    match currencies(&s) {
        Some((base, quote)) => vec![base.to_string(), quote.to_string()],
        None => vec![s],
    }
}

/// True when two symbols have a base or quote currency in common
pub fn shares_currency(a: &str, b: &str) -> bool {
    let b_legs = legs(b);
    legs(a).iter().any(|leg| b_legs.contains(leg))
}

/// +1 when `side` on `symbol` is long `leg`, -1 when short, None if unrelated
pub fn leg_exposure(symbol: &str, side: TradeSide, leg: &str) -> Option<f64> {
    let symbol_legs = legs(symbol);
    match symbol_legs.iter().position(|l| l == leg) {
        Some(0) => Some(side.sign()),
        Some(_) => Some(-side.sign()),
        None => None,
    }
}

/// Broker constraints for one instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolSpec {
    pub symbol: String,
    pub pip_size: f64,
    pub pip_value_per_lot: f64,
    pub min_lot: f64,
    pub max_lot: f64,
    pub lot_step: f64,
    /// Minimum distance between market price and a stop, in price units
    pub min_stop_distance: f64,
}

impl SymbolSpec {
    /// Typical contract values for a symbol when the broker does not supply them
    pub fn default_for(symbol: &str) -> Self {
        let normalized = normalize_symbol(symbol);
        let (pip_size, pip_value_per_lot, max_lot) = match SymbolClass::classify(symbol) {
            SymbolClass::Metal if normalized.starts_with("XAU") => (0.1, 10.0, 0.1),
            SymbolClass::Metal => (0.01, 50.0, 0.5),
            SymbolClass::Crypto => (1.0, 1.0, 1.0),
            SymbolClass::Energy => (0.01, 10.0, 1.0),
            SymbolClass::Index => (1.0, 1.0, 1.0),
            SymbolClass::JpyCross => (0.01, 6.5, 1.0),
            _ => (0.0001, 10.0, 1.0),
        };

        Self {
            symbol: symbol.to_string(),
            pip_size,
            pip_value_per_lot,
            min_lot: 0.01,
            max_lot,
            lot_step: 0.01,
            // 10 points = 1 pip
            min_stop_distance: pip_size,
        }
    }

    pub fn class(&self) -> SymbolClass {
        SymbolClass::classify(&self.symbol)
    }

    pub fn to_pips(&self, price_distance: f64) -> f64 {
        price_distance / self.pip_size
    }

    pub fn from_pips(&self, pips: f64) -> f64 {
        pips * self.pip_size
    }
}

/// Account snapshot from the gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountInfo {
    pub balance: f64,
    pub equity: f64,
}

/// Position currently open at the broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenPosition {
    pub ticket: u64,
    pub symbol: String,
    pub side: TradeSide,
    pub lots: f64,
    pub open_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Money at risk between open price and stop, in account currency
    pub risk_amount: f64,
    pub opened_at: DateTime<Utc>,
    /// Order comment echoed by the venue
    #[serde(default)]
    pub comment: String,
}

/// Market order to submit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: TradeSide,
    pub lots: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub comment: String,
}

/// Confirmed execution of an order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderFill {
    pub ticket: u64,
    pub symbol: String,
    pub side: TradeSide,
    pub lots: f64,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub filled_at: DateTime<Utc>,
}

/// Output of one strategy for one cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub strategy: StrategyKind,
    pub direction: Direction,
    pub reasons: Vec<String>,
    pub raw_confidence: f64,
    pub buy_score: u32,
    pub sell_score: u32,
}

impl Signal {
    pub fn none(strategy: StrategyKind, reason: impl Into<String>) -> Self {
        Self {
            strategy,
            direction: Direction::None,
            reasons: vec![reason.into()],
            raw_confidence: 0.0,
            buy_score: 0,
            sell_score: 0,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.direction != Direction::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_classification() {
        assert_eq!(SymbolClass::classify("EURUSD"), SymbolClass::ForexMajor);
        assert_eq!(SymbolClass::classify("usdjpy.m"), SymbolClass::JpyCross);
        assert_eq!(SymbolClass::classify("GBPUSD"), SymbolClass::GbpCross);
        assert_eq!(SymbolClass::classify("XAUUSD"), SymbolClass::Metal);
        assert_eq!(SymbolClass::classify("BTCUSD"), SymbolClass::Crypto);
        assert_eq!(SymbolClass::classify("USDTRY"), SymbolClass::Exotic);
        assert_eq!(SymbolClass::classify("US30"), SymbolClass::Index);
        assert_eq!(SymbolClass::classify("WTIUSD"), SymbolClass::Energy);
    }

    #[test]
    fn test_quote_sides() {
        let quote = Quote {
            symbol: "EURUSD".to_string(),
            bid: 1.1000,
            ask: 1.1002,
            timestamp: Utc::now(),
        };

        assert!(quote.is_valid());
        assert_eq!(quote.entry_price(TradeSide::Buy), 1.1002);
        assert_eq!(quote.exit_price(TradeSide::Buy), 1.1000);
        assert_eq!(quote.exit_price(TradeSide::Sell), 1.1002);
    }

    #[test]
    fn test_inverted_quote_is_invalid() {
        let quote = Quote {
            symbol: "EURUSD".to_string(),
            bid: 1.2,
            ask: 1.1,
            timestamp: Utc::now(),
        };
        assert!(!quote.is_valid());
    }

    #[test]
    fn test_default_spec_for_gold() {
        let spec = SymbolSpec::default_for("XAUUSD");
        assert_eq!(spec.max_lot, 0.1);
        assert_eq!(spec.pip_size, 0.1);
        assert!((spec.to_pips(1.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_currency_exposure() {
        assert!(shares_currency("EURUSD", "usdjpy.m"));
        assert!(!shares_currency("EURGBP", "AUDNZD"));
        assert_eq!(leg_exposure("EURUSD", TradeSide::Buy, "EUR"), Some(1.0));
        assert_eq!(leg_exposure("EURUSD", TradeSide::Buy, "USD"), Some(-1.0));
        assert_eq!(leg_exposure("USDJPY", TradeSide::Sell, "USD"), Some(-1.0));
        assert_eq!(leg_exposure("US30", TradeSide::Buy, "EUR"), None);
    }

    #[test]
    fn test_strategy_parse_roundtrip() {
        for kind in StrategyKind::ALL {
            let parsed: StrategyKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }
}
