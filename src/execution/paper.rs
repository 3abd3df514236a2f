use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::gateway::Gateway;
use crate::error::GatewayError;
use crate::models::{
    normalize_symbol, AccountInfo, OpenPosition, OrderFill, OrderRequest, PriceBar, Quote,
    SymbolSpec, Timeframe, TradeSide,
};

/// Broker-style reject codes
pub const REJECT_INVALID_VOLUME: i32 = 10014;
pub const REJECT_INVALID_STOPS: i32 = 10016;
pub const REJECT_UNKNOWN_POSITION: i32 = 10036;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartPrice {
    pub symbol: String,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PaperConfig {
    pub seed: u64,
    pub initial_balance: f64,
    /// Largest one-minute move, percent
    pub volatility_pct: f64,
    pub spread_pips: f64,
    pub base_volume: f64,
    pub start_prices: Vec<StartPrice>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        let start = |symbol: &str, price: f64| StartPrice {
            symbol: symbol.to_string(),
            price,
        };
        Self {
            seed: 42,
            initial_balance: 10_000.0,
            volatility_pct: 0.02,
            spread_pips: 1.0,
            base_volume: 1_000.0,
            start_prices: vec![
                start("EURUSD", 1.0850),
                start("GBPUSD", 1.2650),
                start("USDJPY", 151.20),
                start("XAUUSD", 2350.0),
            ],
        }
    }
}

#[derive(Debug)]
struct Market {
    spec: SymbolSpec,
    price: f64,
}

#[derive(Debug)]
struct PaperState {
    rng: StdRng,
    markets: HashMap<String, Market>,
    scripted: HashMap<(String, Timeframe), Vec<PriceBar>>,
    // Symbols whose price only moves when set explicitly
    pinned: HashSet<String>,
    positions: Vec<OpenPosition>,
    balance: f64,
    next_ticket: u64,
    unavailable: bool,
    failing_timeframes: HashSet<Timeframe>,
    stop_rejections: u32,
}

impl PaperState {
    fn market(&mut self, symbol: &str, default_price: f64) -> &mut Market {
        self.markets
            .entry(normalize_symbol(symbol))
            .or_insert_with(|| Market {
                spec: SymbolSpec::default_for(symbol),
                price: default_price,
            })
    }

    fn quote_for(&self, symbol: &str, spread_pips: f64, now: DateTime<Utc>) -> Option<Quote> {
        let market = self.markets.get(&normalize_symbol(symbol))?;
        Some(Quote {
            symbol: symbol.to_string(),
            bid: market.price,
            ask: market.price + market.spec.from_pips(spread_pips),
            timestamp: now,
        })
    }

    fn floating_pnl(&self, spread_pips: f64) -> f64 {
        let now = Utc::now();
        self.positions
            .iter()
            .filter_map(|p| {
                let quote = self.quote_for(&p.symbol, spread_pips, now)?;
                let spec = &self.markets.get(&normalize_symbol(&p.symbol))?.spec;
                Some(position_pnl(p, quote.exit_price(p.side), spec))
            })
            .sum()
    }

    /// Close positions on `symbol` whose stop or target the quote has crossed
    fn settle(&mut self, quote: &Quote) {
        let Some(market) = self.markets.get(&normalize_symbol(&quote.symbol)) else {
            return;
        };
        let spec = market.spec.clone();
        let mut realized = 0.0;

        self.positions.retain(|p| {
            if normalize_symbol(&p.symbol) != normalize_symbol(&quote.symbol) {
                return true;
            }
            let exit = quote.exit_price(p.side);
            let sign = p.side.sign();
            let stopped = p.stop_loss.filter(|sl| (exit - sl) * sign <= 0.0);
            let targeted = p.take_profit.filter(|tp| (exit - tp) * sign >= 0.0);
            match stopped.or(targeted) {
                Some(level) => {
                    let pnl = position_pnl(p, level, &spec);
                    tracing::info!(
                        "Paper ticket {} {} closed at {:.5} ({:+.2})",
                        p.ticket,
                        p.symbol,
                        level,
                        pnl
                    );
                    realized += pnl;
                    false
                }
                None => true,
            }
        });

        self.balance += realized;
    }
}

fn position_pnl(position: &OpenPosition, exit: f64, spec: &SymbolSpec) -> f64 {
    let pips = spec.to_pips((exit - position.open_price) * position.side.sign());
    pips * spec.pip_value_per_lot * position.lots
}

/// In-process venue: seeded random walk prices, instant fills, no slippage.
///
/// Every `quote` call advances that symbol by one step and settles stops
/// and targets against the new price. Failures can be injected for tests.
pub struct PaperGateway {
    config: PaperConfig,
    state: Mutex<PaperState>,
}

impl PaperGateway {
    pub fn new(config: PaperConfig) -> Self {
        let mut markets = HashMap::new();
        for start in &config.start_prices {
            markets.insert(
                normalize_symbol(&start.symbol),
                Market {
                    spec: SymbolSpec::default_for(&start.symbol),
                    price: start.price,
                },
            );
        }
        let state = PaperState {
            rng: StdRng::seed_from_u64(config.seed),
            markets,
            scripted: HashMap::new(),
            pinned: HashSet::new(),
            positions: Vec::new(),
            balance: config.initial_balance,
            next_ticket: 1,
            unavailable: false,
            failing_timeframes: HashSet::new(),
            stop_rejections: 0,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Make every call fail with `Unavailable`
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Make bar requests for `timeframe` fail
    pub async fn fail_timeframe(&self, timeframe: Timeframe) {
        self.state.lock().await.failing_timeframes.insert(timeframe);
    }

    /// Reject the next `count` stop modifications
    pub async fn reject_stop_modifications(&self, count: u32) {
        self.state.lock().await.stop_rejections = count;
    }

    /// Pin the bid of `symbol`; quotes stop walking it
    pub async fn set_price(&self, symbol: &str, price: f64) {
        let mut state = self.state.lock().await;
        state.market(symbol, price).price = price;
        state.pinned.insert(normalize_symbol(symbol));
    }

    pub async fn set_spec(&self, spec: SymbolSpec) {
        let mut state = self.state.lock().await;
        let symbol = spec.symbol.clone();
        let price = state
            .markets
            .get(&normalize_symbol(&symbol))
            .map(|m| m.price)
            .unwrap_or(1.0);
        state.market(&symbol, price).spec = spec;
    }

    /// Serve these bars for `(symbol, timeframe)` instead of a random walk.
    /// The last close becomes the pinned bid.
    pub async fn script_bars(&self, symbol: &str, timeframe: Timeframe, bars: Vec<PriceBar>) {
        let mut state = self.state.lock().await;
        if let Some(last) = bars.last() {
            state.market(symbol, last.close).price = last.close;
        }
        state.pinned.insert(normalize_symbol(symbol));
        state
            .scripted
            .insert((normalize_symbol(symbol), timeframe), bars);
    }

    /// Shift the equity by a realized amount, as a closed trade would
    pub async fn adjust_balance(&self, delta: f64) {
        self.state.lock().await.balance += delta;
    }

    fn random_walk(
        &self,
        rng: &mut StdRng,
        end_price: f64,
        timeframe: Timeframe,
        count: usize,
        now: DateTime<Utc>,
    ) -> Vec<PriceBar> {
        let step =
            (self.config.volatility_pct / 100.0 * (timeframe.minutes() as f64).sqrt()).max(1e-9);
        let period = timeframe.minutes() * 60;
        let aligned = now.timestamp() - now.timestamp().rem_euclid(period);
        let last_open = DateTime::from_timestamp(aligned, 0).unwrap_or(now) - timeframe.duration();

        // Walk backwards so the newest close lands on the current price
        let mut closes = vec![end_price; count];
        for i in (0..count.saturating_sub(1)).rev() {
            let ret: f64 = rng.gen_range(-step..step);
            closes[i] = closes[i + 1] / (1.0 + ret);
        }

        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = if i == 0 { close } else { closes[i - 1] };
                let wick_up: f64 = rng.gen_range(0.0..step / 2.0);
                let wick_down: f64 = rng.gen_range(0.0..step / 2.0);
                PriceBar {
                    timestamp: last_open - Duration::seconds(period * (count - 1 - i) as i64),
                    open,
                    high: open.max(close) * (1.0 + wick_up),
                    low: open.min(close) * (1.0 - wick_down),
                    close,
                    volume: self.config.base_volume * rng.gen_range(0.5..1.5),
                }
            })
            .collect()
    }

    fn check_available(state: &PaperState) -> Result<(), GatewayError> {
        if state.unavailable {
            return Err(GatewayError::Unavailable("paper venue offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for PaperGateway {
    async fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<PriceBar>, GatewayError> {
        let mut state = self.state.lock().await;
        Self::check_available(&state)?;
        if state.failing_timeframes.contains(&timeframe) {
            return Err(GatewayError::Unavailable(format!(
                "{} history unavailable",
                timeframe
            )));
        }

        if let Some(bars) = state.scripted.get(&(normalize_symbol(symbol), timeframe)) {
            let start = bars.len().saturating_sub(count);
            return Ok(bars[start..].to_vec());
        }

        let key = normalize_symbol(symbol);
        let price = match state.markets.get(&key) {
            Some(market) => market.price,
            None => return Err(GatewayError::Rejected {
                code: 4301,
                reason: format!("unknown symbol {}", symbol),
            }),
        };
        let state = &mut *state;
        Ok(self.random_walk(&mut state.rng, price, timeframe, count, Utc::now()))
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, GatewayError> {
        let mut state = self.state.lock().await;
        Self::check_available(&state)?;
        let key = normalize_symbol(symbol);
        if !state.markets.contains_key(&key) {
            return Err(GatewayError::Rejected {
                code: 4301,
                reason: format!("unknown symbol {}", symbol),
            });
        }

        if !state.pinned.contains(&key) {
            let step = (self.config.volatility_pct / 100.0).max(1e-9);
            let ret: f64 = state.rng.gen_range(-step..step);
            if let Some(market) = state.markets.get_mut(&key) {
                market.price *= 1.0 + ret;
            }
        }

        let quote = state
            .quote_for(symbol, self.config.spread_pips, Utc::now())
            .ok_or_else(|| GatewayError::Unavailable(format!("no price for {}", symbol)))?;
        state.settle(&quote);
        Ok(quote)
    }

    async fn account(&self) -> Result<AccountInfo, GatewayError> {
        let state = self.state.lock().await;
        Self::check_available(&state)?;
        Ok(AccountInfo {
            balance: state.balance,
            equity: state.balance + state.floating_pnl(self.config.spread_pips),
        })
    }

    async fn open_positions(&self) -> Result<Vec<OpenPosition>, GatewayError> {
        let state = self.state.lock().await;
        Self::check_available(&state)?;
        Ok(state.positions.clone())
    }

    async fn symbol_spec(&self, symbol: &str) -> Result<SymbolSpec, GatewayError> {
        let state = self.state.lock().await;
        Self::check_available(&state)?;
        Ok(state
            .markets
            .get(&normalize_symbol(symbol))
            .map(|m| m.spec.clone())
            .unwrap_or_else(|| SymbolSpec::default_for(symbol)))
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderFill, GatewayError> {
        let mut state = self.state.lock().await;
        Self::check_available(&state)?;
        let now = Utc::now();
        let quote = state
            .quote_for(&order.symbol, self.config.spread_pips, now)
            .ok_or_else(|| GatewayError::Rejected {
                code: 4301,
                reason: format!("unknown symbol {}", order.symbol),
            })?;
        let spec = state
            .markets
            .get(&normalize_symbol(&order.symbol))
            .map(|m| m.spec.clone())
            .unwrap_or_else(|| SymbolSpec::default_for(&order.symbol));

        if order.lots < spec.min_lot - 1e-9 || order.lots > spec.max_lot + 1e-9 {
            return Err(GatewayError::Rejected {
                code: REJECT_INVALID_VOLUME,
                reason: format!(
                    "volume {} outside [{}, {}]",
                    order.lots, spec.min_lot, spec.max_lot
                ),
            });
        }

        let price = quote.entry_price(order.side);
        let sign = order.side.sign();
        if (price - order.stop_loss) * sign <= 0.0 || (order.take_profit - price) * sign <= 0.0 {
            return Err(GatewayError::Rejected {
                code: REJECT_INVALID_STOPS,
                reason: format!(
                    "stops {:.5}/{:.5} on wrong side of {:.5}",
                    order.stop_loss, order.take_profit, price
                ),
            });
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let risk_amount =
            spec.to_pips((price - order.stop_loss).abs()) * spec.pip_value_per_lot * order.lots;
        state.positions.push(OpenPosition {
            ticket,
            symbol: order.symbol.clone(),
            side: order.side,
            lots: order.lots,
            open_price: price,
            stop_loss: Some(order.stop_loss),
            take_profit: Some(order.take_profit),
            risk_amount,
            opened_at: now,
            comment: order.comment.clone(),
        });

        Ok(OrderFill {
            ticket,
            symbol: order.symbol.clone(),
            side: order.side,
            lots: order.lots,
            price,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            filled_at: now,
        })
    }

    async fn modify_stop(&self, ticket: u64, stop_loss: f64) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        Self::check_available(&state)?;
        if state.stop_rejections > 0 {
            state.stop_rejections -= 1;
            return Err(GatewayError::Rejected {
                code: REJECT_INVALID_STOPS,
                reason: "stop modification refused".to_string(),
            });
        }

        let now = Utc::now();
        let (symbol, side) = match state.positions.iter().find(|p| p.ticket == ticket) {
            Some(p) => (p.symbol.clone(), p.side),
            None => {
                return Err(GatewayError::Rejected {
                    code: REJECT_UNKNOWN_POSITION,
                    reason: format!("ticket {} not found", ticket),
                })
            }
        };
        let quote = state
            .quote_for(&symbol, self.config.spread_pips, now)
            .ok_or_else(|| GatewayError::Unavailable(format!("no price for {}", symbol)))?;
        let spec = state
            .markets
            .get(&normalize_symbol(&symbol))
            .map(|m| m.spec.clone())
            .unwrap_or_else(|| SymbolSpec::default_for(&symbol));
        let min_distance = spec.min_stop_distance;

        let exit = quote.exit_price(side);
        if (exit - stop_loss) * side.sign() < min_distance - 1e-12 {
            return Err(GatewayError::Rejected {
                code: REJECT_INVALID_STOPS,
                reason: format!("stop {:.5} too close to {:.5}", stop_loss, exit),
            });
        }

        if let Some(position) = state.positions.iter_mut().find(|p| p.ticket == ticket) {
            position.stop_loss = Some(stop_loss);
            let locked = (stop_loss - position.open_price) * side.sign();
            position.risk_amount = if locked >= 0.0 {
                0.0
            } else {
                spec.to_pips(-locked) * spec.pip_value_per_lot * position.lots
            };
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok, block_on};

    fn order(side: TradeSide, stop: f64, target: f64) -> OrderRequest {
        OrderRequest {
            symbol: "EURUSD".to_string(),
            side,
            lots: 0.10,
            stop_loss: stop,
            take_profit: target,
            comment: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_bars() {
        let a = PaperGateway::new(PaperConfig::default());
        let b = PaperGateway::new(PaperConfig::default());
        let bars_a = a.bars("EURUSD", Timeframe::M5, 50).await.unwrap();
        let bars_b = b.bars("EURUSD", Timeframe::M5, 50).await.unwrap();

        assert_eq!(bars_a.len(), 50);
        assert_eq!(
            bars_a.iter().map(|b| b.close).collect::<Vec<_>>(),
            bars_b.iter().map(|b| b.close).collect::<Vec<_>>()
        );
        assert!(bars_a.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(bars_a.iter().all(|b| b.high >= b.open.max(b.close)));
        assert!((bars_a[49].close - 1.0850).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_fill_and_stop_out() {
        let gw = PaperGateway::new(PaperConfig::default());
        gw.set_price("EURUSD", 1.1000).await;
        let fill = gw
            .submit_order(&order(TradeSide::Buy, 1.0980, 1.1050))
            .await
            .unwrap();
        assert!((fill.price - 1.1001).abs() < 1e-9);
        assert_eq!(gw.open_positions().await.unwrap().len(), 1);

        gw.set_price("EURUSD", 1.0970).await;
        gw.quote("EURUSD").await.unwrap();

        assert!(gw.open_positions().await.unwrap().is_empty());
        let account = gw.account().await.unwrap();
        // 21 pips lost on 0.1 lot at $10/pip
        assert!((account.balance - (10_000.0 - 21.0)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_set_spec_keeps_price() {
        let gw = PaperGateway::new(PaperConfig::default());
        gw.set_price("EURUSD", 1.1000).await;
        gw.set_spec(SymbolSpec {
            max_lot: 0.05,
            ..SymbolSpec::default_for("EURUSD")
        })
        .await;

        let spec = gw.symbol_spec("EURUSD").await.unwrap();
        assert!((spec.max_lot - 0.05).abs() < 1e-12);
        let quote = gw.quote("EURUSD").await.unwrap();
        assert!((quote.bid - 1.1000).abs() < 1e-12);

        // 0.10 lots is now over the maximum
        let err = gw
            .submit_order(&order(TradeSide::Buy, 1.0980, 1.1050))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_wrong_side_stop_is_rejected() {
        let gw = PaperGateway::new(PaperConfig::default());
        gw.set_price("EURUSD", 1.1000).await;
        let err = gw
            .submit_order(&order(TradeSide::Sell, 1.0980, 1.0950))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Rejected {
                code: REJECT_INVALID_STOPS,
                ..
            }
        ));
    }

    #[test]
    fn test_unavailable_and_failing_timeframe() {
        let gw = PaperGateway::new(PaperConfig::default());
        block_on(gw.fail_timeframe(Timeframe::H1));
        assert_err!(block_on(gw.bars("EURUSD", Timeframe::H1, 10)));
        assert_ok!(block_on(gw.bars("EURUSD", Timeframe::M5, 10)));

        block_on(gw.set_unavailable(true));
        assert!(matches!(
            block_on(gw.account()),
            Err(GatewayError::Unavailable(_))
        ));
        block_on(gw.set_unavailable(false));
        assert_ok!(block_on(gw.account()));
    }

    #[tokio::test]
    async fn test_modify_stop_respects_min_distance() {
        let gw = PaperGateway::new(PaperConfig::default());
        gw.set_price("EURUSD", 1.1000).await;
        let fill = gw
            .submit_order(&order(TradeSide::Buy, 1.0980, 1.1050))
            .await
            .unwrap();

        assert!(gw.modify_stop(fill.ticket, 1.1000).await.is_err());
        gw.modify_stop(fill.ticket, 1.0990).await.unwrap();
        let positions = gw.open_positions().await.unwrap();
        assert_eq!(positions[0].stop_loss, Some(1.0990));
    }
}
