use crate::models::{MarketOrderRequest, OrderResult, Position, SymbolInfo};
use anyhow::Result;

/// Session to one trading terminal (one account). The watcher and executor
/// each own an independent implementation of this; they never share one.
///
/// Transport failures surface as `Err`; a reachable broker that refuses an
/// order returns `Ok` with `OrderResult::success == false`.
#[async_trait::async_trait]
pub trait TerminalGateway: Send + Sync {
    async fn connect(&self) -> Result<bool>;

    async fn disconnect(&self);

    /// Last known session state; cheap, no network round trip.
    fn is_connected(&self) -> bool;

    async fn get_balance(&self) -> Result<f64>;

    async fn list_open_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>>;

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo>;

    async fn place_market_order(&self, req: &MarketOrderRequest<'_>) -> Result<OrderResult>;

    async fn close_position(&self, ticket: i64, slippage: i32) -> Result<OrderResult>;

    async fn partial_close(&self, ticket: i64, volume: f64, slippage: i32)
        -> Result<OrderResult>;

    async fn modify_position(
        &self,
        ticket: i64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<OrderResult>;
}
