//! REST client for the OMTrader trading API
//!
//! Authenticates with an API key via the oauth2 login endpoint and exchanges
//! it for a bearer token, acquired lazily on the first authenticated request.

pub mod models;

pub use models::*;

use crate::config::{ConfigError, RestConfig};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum RestError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Unified REST client covering accounts, orders, positions, symbols, and
/// deals.
///
/// ```no_run
/// use omtrader::config::RestConfig;
/// use omtrader::rest::RestClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RestClient::new(RestConfig::from_env()?)?;
/// let account = client.get_account().await?;
/// println!("Balance: {:?}", account.balance);
/// # Ok(())
/// # }
/// ```
pub struct RestClient {
    http: reqwest::Client,
    config: RestConfig,
    access_token: Mutex<Option<String>>,
}

impl RestClient {
    /// Create a client. Fails only on configuration problems; no network
    /// traffic happens until the first request.
    pub fn new(config: RestConfig) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            access_token: Mutex::new(None),
        })
    }

    /// Create a client from `OMTRADER_API_KEY` / `OMTRADER_HOST`
    pub fn from_env() -> Result<Self, RestError> {
        Self::new(RestConfig::from_env()?)
    }

    /// Exchange the API key for a bearer token. Called automatically by the
    /// first authenticated request; call it directly to obtain the token for
    /// the WebSocket client.
    pub async fn login(&self) -> Result<LoginData, RestError> {
        let url = format!("{}/api/v1/oauth2/login", self.config.host);
        debug!(host = %self.config.host, "Authenticating with API key");

        let response = self
            .http
            .post(&url)
            .query(&[("remember_me", "false"), ("grant_type", "api_key")])
            .header("API-Key", &self.config.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Login request failed");
            return Err(RestError::Auth(format!(
                "login failed with status {status}: {body}"
            )));
        }

        let envelope: ApiEnvelope<LoginData> = response.json().await?;
        match envelope.data {
            Some(data) if envelope.success => {
                *self.access_token.lock().await = Some(data.access_token.clone());
                info!("Authentication successful");
                Ok(data)
            }
            _ => Err(RestError::Auth(envelope.message.unwrap_or_else(|| {
                "login response carried no access token".to_string()
            }))),
        }
    }

    // Account methods

    pub async fn get_account(&self) -> Result<Account, RestError> {
        self.request(Method::GET, "/trader/account", NO_QUERY, NO_BODY)
            .await
    }

    pub async fn open_account(&self, request: &OpenAccountRequest) -> Result<Account, RestError> {
        self.request(Method::POST, "/trader/account", NO_QUERY, Some(request))
            .await
    }

    // Order methods

    pub async fn list_orders(&self) -> Result<Vec<Order>, RestError> {
        self.request_list(Method::GET, "/trader/orders", NO_QUERY, NO_BODY)
            .await
    }

    pub async fn get_order(&self, order_id: i64) -> Result<Order, RestError> {
        self.request(
            Method::GET,
            &format!("/trader/orders/{order_id}"),
            NO_QUERY,
            NO_BODY,
        )
        .await
    }

    /// Create an order; returns the new order's ID
    pub async fn create_order(&self, request: &CreateOrderRequest) -> Result<String, RestError> {
        let data: Value = self
            .request(Method::POST, "/trader/orders", NO_QUERY, Some(request))
            .await?;
        id_string(data)
    }

    pub async fn update_order(
        &self,
        order_id: i64,
        request: &UpdateOrderRequest,
    ) -> Result<String, RestError> {
        let data: Value = self
            .request(
                Method::PUT,
                &format!("/trader/orders/{order_id}"),
                NO_QUERY,
                Some(request),
            )
            .await?;
        id_string(data)
    }

    /// Cancel an order. When `request` is `None` the order is fetched first
    /// to fill in the account and user IDs.
    pub async fn cancel_order(
        &self,
        order_id: i64,
        request: Option<CancelOrderRequest>,
    ) -> Result<String, RestError> {
        let request = match request {
            Some(request) => request,
            None => {
                let order = self.get_order(order_id).await?;
                let account_id = order.account_id.unwrap_or_default();
                CancelOrderRequest {
                    id: order_id,
                    account_id,
                    // The API keys both fields to the account
                    user_id: account_id,
                }
            }
        };
        let data: Value = self
            .request(
                Method::DELETE,
                &format!("/trader/orders/{order_id}"),
                NO_QUERY,
                Some(&request),
            )
            .await?;
        id_string(data)
    }

    pub async fn list_orders_history(&self) -> Result<Vec<Order>, RestError> {
        self.request_list(Method::GET, "/trader/orders/history", NO_QUERY, NO_BODY)
            .await
    }

    pub async fn approve_order(
        &self,
        order_id: i64,
        request: &ApproveOrderRequest,
    ) -> Result<String, RestError> {
        let data: Value = self
            .request(
                Method::POST,
                &format!("/trader/orders/{order_id}/approve"),
                NO_QUERY,
                Some(request),
            )
            .await?;
        id_string(data)
    }

    // Position methods

    pub async fn list_positions(&self) -> Result<Vec<Position>, RestError> {
        self.request_list(Method::GET, "/trader/positions", NO_QUERY, NO_BODY)
            .await
    }

    pub async fn get_position(&self, position_id: i64) -> Result<Position, RestError> {
        self.request(
            Method::GET,
            &format!("/trader/positions/{position_id}"),
            NO_QUERY,
            NO_BODY,
        )
        .await
    }

    pub async fn update_position(
        &self,
        position_id: i64,
        request: &UpdatePositionRequest,
    ) -> Result<String, RestError> {
        let data: Value = self
            .request(
                Method::PUT,
                &format!("/trader/positions/{position_id}"),
                NO_QUERY,
                Some(request),
            )
            .await?;
        id_string(data)
    }

    /// Close a position. When `request` is `None` the position is fetched
    /// first to fill in the account ID and current volume.
    pub async fn close_position(
        &self,
        position_id: i64,
        request: Option<ClosePositionRequest>,
    ) -> Result<String, RestError> {
        let request = match request {
            Some(request) => request,
            None => {
                let position = self.get_position(position_id).await?;
                let account_id = position.account_id.unwrap_or_default();
                let volume = position
                    .volume_current
                    .or(position.volume_initial)
                    .unwrap_or_else(|| Decimal::new(1, 2));
                ClosePositionRequest {
                    id: position_id,
                    account_id,
                    user_id: account_id,
                    volume,
                }
            }
        };
        let data: Value = self
            .request(
                Method::DELETE,
                &format!("/trader/positions/{position_id}"),
                NO_QUERY,
                Some(&request),
            )
            .await?;
        id_string(data)
    }

    pub async fn list_positions_history(&self) -> Result<Vec<Position>, RestError> {
        self.request_list(Method::GET, "/trader/positions/history", NO_QUERY, NO_BODY)
            .await
    }

    // Symbol methods

    pub async fn list_symbols(&self) -> Result<Vec<SymbolInfo>, RestError> {
        self.request_list(Method::GET, "/trader/symbols", NO_QUERY, NO_BODY)
            .await
    }

    pub async fn get_symbol(&self, symbol_id: i64) -> Result<SymbolInfo, RestError> {
        self.request(
            Method::GET,
            &format!("/trader/symbols/{symbol_id}"),
            NO_QUERY,
            NO_BODY,
        )
        .await
    }

    pub async fn get_symbol_ticks_history(
        &self,
        symbol_id: i64,
        query: &TicksHistoryQuery,
    ) -> Result<Vec<HistoryTick>, RestError> {
        self.request_list(
            Method::GET,
            &format!("/trader/symbols/{symbol_id}/ticks/history"),
            Some(query),
            NO_BODY,
        )
        .await
    }

    // Deal methods

    pub async fn list_deals(&self, query: &DealsQuery) -> Result<Vec<Deal>, RestError> {
        self.request_list(Method::GET, "/trader/deals", Some(query), NO_BODY)
            .await
    }

    pub async fn get_deal(&self, deal_id: i64) -> Result<Deal, RestError> {
        self.request(
            Method::GET,
            &format!("/trader/deals/{deal_id}"),
            NO_QUERY,
            NO_BODY,
        )
        .await
    }

    /// Cached bearer token, logging in on first use
    async fn token(&self) -> Result<String, RestError> {
        if let Some(token) = self.access_token.lock().await.clone() {
            return Ok(token);
        }
        Ok(self.login().await?.access_token)
    }

    async fn request<T, Q, B>(
        &self,
        method: Method,
        path: &str,
        query: Option<&Q>,
        body: Option<&B>,
    ) -> Result<T, RestError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        let (status, envelope) = self.send(method, path, query, body).await?;
        envelope.data.ok_or(RestError::Api {
            status,
            message: "response carried no data".to_string(),
        })
    }

    /// Like [`RestClient::request`] but treats an absent `data` as an empty
    /// list, which the API uses for empty result sets
    async fn request_list<T, Q, B>(
        &self,
        method: Method,
        path: &str,
        query: Option<&Q>,
        body: Option<&B>,
    ) -> Result<Vec<T>, RestError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        let (_, envelope) = self.send(method, path, query, body).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    async fn send<T, Q, B>(
        &self,
        method: Method,
        path: &str,
        query: Option<&Q>,
        body: Option<&B>,
    ) -> Result<(u16, ApiEnvelope<T>), RestError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        let token = self.token().await?;
        let url = format!("{}/api/v1{}", self.config.host, path);
        debug!(method = %method, path, "REST request");

        let mut request = self.http.request(method, &url).bearer_auth(&token);
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), path, "REST request failed");
            return Err(RestError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        if !envelope.success {
            return Err(RestError::Api {
                status: status.as_u16(),
                message: envelope
                    .message
                    .unwrap_or_else(|| "request was not successful".to_string()),
            });
        }
        Ok((status.as_u16(), envelope))
    }
}

const NO_QUERY: Option<&()> = None;
const NO_BODY: Option<&()> = None;

/// Command endpoints return the affected entity's ID as a string or number
fn id_string(data: Value) -> Result<String, RestError> {
    match data {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(RestError::Api {
            status: 200,
            message: format!("unexpected response payload: {other}"),
        }),
    }
}
