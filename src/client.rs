use crate::config::AccountConfig;
use crate::gateway::TerminalGateway;
use crate::models::{MarketOrderRequest, OrderResult, Position, SymbolInfo};
use anyhow::{anyhow, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::warn;

// ===== Bridge API envelope =====
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error_code: i32,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(flatten)]
    data: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginReq<'a> {
    login: u64,
    password: &'a str,
    server: &'a str,
}

#[derive(Debug, Deserialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceRes {
    balance: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PositionListReq<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    symbol: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionListRes {
    #[serde(default)]
    positions: Vec<Position>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfoReq<'a> {
    symbol: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClosePositionReq {
    ticket: i64,
    slippage: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PartialCloseReq {
    ticket: i64,
    volume: f64,
    slippage: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyPositionReq {
    ticket: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    take_profit: Option<f64>,
}

// =============== Terminal bridge client =================

/// REST client for one MT5 terminal bridge session.
pub struct BridgeClient {
    api_base: String,
    account: AccountConfig,
    http: Client,
    token: RwLock<Option<String>>,
    connected: AtomicBool,
}

impl BridgeClient {
    pub fn new(api_base: String, account: AccountConfig) -> Self {
        Self {
            api_base,
            account,
            http: Client::new(),
            token: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn label(&self) -> &str {
        &self.account.label
    }

    async fn login(&self) -> Result<String> {
        let url = format!("{}/api/auth/login", self.api_base);
        let body = LoginReq {
            login: self.account.login,
            password: &self.account.password,
            server: &self.account.server,
        };
        let resp = self.http.post(url).json(&body).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(anyhow!("login http status {}", resp.status()));
        }
        let env: ApiEnvelope<Empty> = resp.json().await?;
        if !env.success {
            return Err(anyhow!(
                "login rejected ({}): {:?}",
                env.error_code,
                env.error_message
            ));
        }
        let token = env
            .token
            .ok_or_else(|| anyhow!("missing token in login response"))?;
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn bearer(&self) -> Result<String> {
        if let Some(tok) = self.token.read().await.clone() {
            return Ok(tok);
        }
        self.login().await
    }

    /// Authenticated POST with a single token refresh on 401. Any transport
    /// failure marks the session disconnected.
    async fn authed_post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
        B: Serialize + ?Sized,
    {
        let result = self.authed_post_inner(path, body).await;
        match &result {
            Ok(_) => self.connected.store(true, Ordering::Relaxed),
            Err(_) => self.connected.store(false, Ordering::Relaxed),
        }
        result
    }

    async fn authed_post_inner<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
        B: Serialize + ?Sized,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let token = self.bearer().await?;
            let url = format!("{}{}", self.api_base, path);
            let resp = self.http.post(url).bearer_auth(&token).json(body).send().await?;

            if resp.status() == StatusCode::UNAUTHORIZED && attempts < 2 {
                self.login().await?;
                continue;
            }
            if !resp.status().is_success() {
                let status = resp.status();
                let txt = resp.text().await.unwrap_or_default();
                return Err(anyhow!("POST {} failed: {} - {}", path, status, txt));
            }
            return Ok(resp.json().await?);
        }
    }

    async fn query<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
        B: Serialize + ?Sized,
    {
        let env: ApiEnvelope<T> = self.authed_post(path, body).await?;
        if !env.success {
            return Err(anyhow!(
                "bridge error {} on {}: {:?}",
                env.error_code,
                path,
                env.error_message
            ));
        }
        Ok(env.data)
    }

    /// Order endpoints answer with the order outcome itself; a rejection is a
    /// 2xx response with `success == false`, not a transport error.
    async fn order_call<B>(&self, path: &str, body: &B) -> Result<OrderResult>
    where
        B: Serialize + ?Sized,
    {
        self.authed_post(path, body).await
    }
}

#[async_trait::async_trait]
impl TerminalGateway for BridgeClient {
    async fn connect(&self) -> Result<bool> {
        match self.login().await {
            Ok(_) => {
                self.connected.store(true, Ordering::Relaxed);
                Ok(true)
            }
            Err(e) => {
                warn!("[{}] connect failed: {e}", self.account.label);
                self.connected.store(false, Ordering::Relaxed);
                Ok(false)
            }
        }
    }

    async fn disconnect(&self) {
        *self.token.write().await = None;
        self.connected.store(false, Ordering::Relaxed);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn get_balance(&self) -> Result<f64> {
        let res: BalanceRes = self
            .query("/api/account/balance", &serde_json::json!({}))
            .await?;
        Ok(res.balance)
    }

    async fn list_open_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>> {
        let req = PositionListReq { symbol };
        let res: PositionListRes = self.query("/api/position/list", &req).await?;
        Ok(res.positions)
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo> {
        let req = SymbolInfoReq { symbol };
        self.query("/api/symbol/info", &req).await
    }

    async fn place_market_order(&self, req: &MarketOrderRequest<'_>) -> Result<OrderResult> {
        self.order_call("/api/order/market", req).await
    }

    async fn close_position(&self, ticket: i64, slippage: i32) -> Result<OrderResult> {
        let req = ClosePositionReq { ticket, slippage };
        self.order_call("/api/position/close", &req).await
    }

    async fn partial_close(
        &self,
        ticket: i64,
        volume: f64,
        slippage: i32,
    ) -> Result<OrderResult> {
        let req = PartialCloseReq {
            ticket,
            volume,
            slippage,
        };
        self.order_call("/api/position/partialClose", &req).await
    }

    async fn modify_position(
        &self,
        ticket: i64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<OrderResult> {
        let req = ModifyPositionReq {
            ticket,
            stop_loss,
            take_profit,
        };
        self.order_call("/api/position/modify", &req).await
    }
}
