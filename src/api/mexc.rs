use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::ExchangeError;
use super::klines::decode_klines;
use super::signing::Signer;
use super::stream::{StreamConfig, StreamSession};
use super::{Exchange, ListenKeySource};
use crate::models::{de_f64, AccountInfo, Kline, Order, OrderAck, OrderRequest, OrderUpdate};

const MEXC_API_BASE: &str = "https://api.mexc.com";
const MEXC_WS_BASE: &str = "wss://wbs-api.mexc.com/ws";
const API_PREFIX: &str = "/api/v3";
const API_KEY_HEADER: &str = "X-MEXC-APIKEY";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
const MUTATION_DELAY: Duration = Duration::from_millis(200);

/// Signed REST client for MEXC spot, scoped to one symbol.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Clone)]
pub struct MexcClient {
    client: Client,
    api_key: String,
    signer: Signer,
    symbol: String,
    base_url: String,
    ws_url: String,
    mutation_delay: Duration,
    stream_config: StreamConfig,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    #[serde(deserialize_with = "de_f64")]
    price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKeyResponse {
    listen_key: String,
}

impl MexcClient {
    pub fn new(api_key: &str, secret_key: &str, symbol: &str) -> Result<Self, ExchangeError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            signer: Signer::new(secret_key)?,
            symbol: symbol.to_string(),
            base_url: MEXC_API_BASE.to_string(),
            ws_url: MEXC_WS_BASE.to_string(),
            mutation_delay: MUTATION_DELAY,
            stream_config: StreamConfig::default(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_ws_url(mut self, ws_url: &str) -> Self {
        self.ws_url = ws_url.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ExchangeError> {
        self.client = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn with_mutation_delay(mut self, delay: Duration) -> Self {
        self.mutation_delay = delay;
        self
    }

    pub fn with_stream_config(mut self, config: StreamConfig) -> Self {
        self.stream_config = config;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn endpoint(&self, path: &str) -> Result<Url, ExchangeError> {
        let raw = format!("{}{}{}", self.base_url, API_PREFIX, path);
        Url::parse(&raw).map_err(|e| ExchangeError::InvalidUrl(format!("{}: {}", raw, e)))
    }

    fn public_url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, ExchangeError> {
        let mut url = self.endpoint(path)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Append `timestamp`, then sign the exact query string that goes on the wire.
    fn signed_url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, ExchangeError> {
        let mut url = self.endpoint(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("timestamp", &Utc::now().timestamp_millis().to_string());
        }

        let signature = self.signer.sign(url.query().unwrap_or_default());
        url.query_pairs_mut().append_pair("signature", &signature);
        Ok(url)
    }

    fn signed_request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &'static str,
    ) -> Result<T, ExchangeError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ExchangeError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|source| ExchangeError::Decode {
            context,
            source,
            body,
        })
    }

    fn symbol_param(&self) -> (&'static str, String) {
        ("symbol", self.symbol.clone())
    }

    fn order_params(&self, request: &OrderRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            self.symbol_param(),
            ("side", request.side.as_str().to_string()),
            ("type", request.order_type.as_str().to_string()),
            ("quantity", format!("{:.8}", request.quantity)),
        ];
        if let Some(price) = request.price {
            params.push(("price", format!("{:.8}", price)));
        }
        params
    }
}

#[async_trait]
impl Exchange for MexcClient {
    async fn get_price(&self) -> Result<f64, ExchangeError> {
        let url = self.public_url("/ticker/price", &[self.symbol_param()])?;
        let ticker: TickerPrice = self.execute(self.client.get(url), "ticker price").await?;
        Ok(ticker.price)
    }

    async fn get_account(&self) -> Result<AccountInfo, ExchangeError> {
        let url = self.signed_url("/account", &[])?;
        self.execute(self.signed_request(Method::GET, url), "account")
            .await
    }

    async fn get_open_orders(&self) -> Result<Vec<Order>, ExchangeError> {
        let url = self.signed_url("/openOrders", &[self.symbol_param()])?;
        self.execute(self.signed_request(Method::GET, url), "open orders")
            .await
    }

    async fn get_all_orders(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Order>, ExchangeError> {
        let url = self.signed_url(
            "/allOrders",
            &[
                self.symbol_param(),
                ("startTime", start_ms.to_string()),
                ("endTime", end_ms.to_string()),
            ],
        )?;
        self.execute(self.signed_request(Method::GET, url), "order history")
            .await
    }

    async fn get_klines(&self, interval: &str, limit: usize) -> Result<Vec<Kline>, ExchangeError> {
        // One extra row so the still-open candle can be dropped
        let url = self.public_url(
            "/klines",
            &[
                self.symbol_param(),
                ("interval", interval.to_string()),
                ("limit", (limit + 1).to_string()),
            ],
        )?;
        let rows: Vec<Vec<Value>> = self.execute(self.client.get(url), "klines").await?;
        decode_klines(rows, limit, Utc::now().timestamp_millis())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let url = self.signed_url("/order", &self.order_params(request))?;
        let result = self
            .execute(self.signed_request(Method::POST, url), "order ack")
            .await;
        tokio::time::sleep(self.mutation_delay).await;

        let ack: OrderAck = result?;
        tracing::info!(
            order_id = %ack.order_id,
            side = request.side.as_str(),
            order_type = request.order_type.as_str(),
            quantity = request.quantity,
            price = ?request.price,
            "Order placed"
        );
        Ok(ack)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let url = self.signed_url(
            "/order",
            &[self.symbol_param(), ("orderId", order_id.to_string())],
        )?;
        let result: Result<Value, _> = self
            .execute(self.signed_request(Method::DELETE, url), "cancel ack")
            .await;
        tokio::time::sleep(self.mutation_delay).await;

        result?;
        tracing::info!(order_id = %order_id, "Order cancelled");
        Ok(())
    }

    async fn subscribe_order_updates(
        &self,
        shutdown: CancellationToken,
        tx: mpsc::Sender<OrderUpdate>,
    ) -> Result<JoinHandle<()>, ExchangeError> {
        let session = StreamSession::new(
            Arc::new(self.clone()),
            &self.ws_url,
            self.stream_config.clone(),
        );
        Ok(session.spawn(shutdown, tx))
    }
}

#[async_trait]
impl ListenKeySource for MexcClient {
    async fn create_listen_key(&self) -> Result<String, ExchangeError> {
        let url = self.signed_url("/userDataStream", &[])?;
        let response: ListenKeyResponse = self
            .execute(self.signed_request(Method::POST, url), "listen key")
            .await?;
        Ok(response.listen_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, OrderStatus};
    use mockito::Matcher;
    use std::time::Instant;

    fn client_for(server: &mockito::Server) -> MexcClient {
        MexcClient::new("test-key", "test-secret", "KASUSDT")
            .unwrap()
            .with_base_url(&server.url())
            .with_mutation_delay(Duration::from_millis(0))
    }

    #[test]
    fn test_signed_url_signs_exact_query() {
        let client = MexcClient::new("key", "secret", "KASUSDT").unwrap();
        let url = client
            .signed_url("/order", &[("symbol", "KASUSDT".to_string())])
            .unwrap();

        let query = url.query().unwrap();
        let (unsigned, signature) = query.rsplit_once("&signature=").unwrap();

        assert!(unsigned.starts_with("symbol=KASUSDT&timestamp="));
        assert_eq!(signature, Signer::new("secret").unwrap().sign(unsigned));
    }

    #[tokio::test]
    async fn test_get_price() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::UrlEncoded("symbol".into(), "KASUSDT".into()))
            .with_status(200)
            .with_body(r#"{"symbol":"KASUSDT","price":"0.08123"}"#)
            .create_async()
            .await;

        let price = client_for(&server).get_price().await.unwrap();

        assert_eq!(price, 0.08123);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_signed_request_carries_key_and_signature() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/openOrders")
            .match_header(API_KEY_HEADER, "test-key")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "KASUSDT".into()),
                Matcher::Regex("timestamp=[0-9]{13}".into()),
                Matcher::Regex("signature=[0-9a-f]{64}$".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"[{"symbol":"KASUSDT","orderId":"1","price":"0.08","origQty":"40",
                "executedQty":"0","status":"NEW","type":"LIMIT","side":"BUY","time":1}]"#,
            )
            .create_async()
            .await;

        let orders = client_for(&server).get_open_orders().await.unwrap();

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::New);
        assert_eq!(orders[0].side, OrderSide::Buy);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_maps_to_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v3/account")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":700002,"msg":"Signature for this request is not valid."}"#)
            .create_async()
            .await;

        let err = client_for(&server).get_account().await.unwrap_err();

        match err {
            ExchangeError::Http { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("700002"));
            }
            other => panic!("expected Http error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_maps_to_decode_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = client_for(&server).get_price().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Decode { context: "ticker price", .. }));
    }

    #[tokio::test]
    async fn test_klines_request_one_extra_row() {
        let mut server = mockito::Server::new_async().await;
        let now = Utc::now().timestamp_millis();
        let body = serde_json::json!([
            [now - 180_000, "1.0", "1.1", "0.9", "1.05", "10", now - 120_001, "10"],
            [now - 120_000, "1.05", "1.1", "0.9", "1.0", "10", now - 60_001, "10"],
            [now - 60_000, "1.0", "1.1", "0.9", "1.02", "10", now + 60_000, "10"]
        ]);
        let mock = server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("interval".into(), "1m".into()),
                Matcher::UrlEncoded("limit".into(), "3".into()),
            ]))
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let klines = client_for(&server).get_klines("1m", 2).await.unwrap();

        assert_eq!(klines.len(), 2);
        assert!(klines.iter().all(|k| k.close_time < now));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_place_order_formats_and_waits() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v3/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("side".into(), "BUY".into()),
                Matcher::UrlEncoded("type".into(), "LIMIT".into()),
                Matcher::UrlEncoded("quantity".into(), "40.00000000".into()),
                Matcher::UrlEncoded("price".into(), "0.08120000".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"symbol":"KASUSDT","orderId":"C02__9","price":"0.0812","origQty":"40",
                "type":"LIMIT","side":"BUY","transactTime":1718000000000}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server).with_mutation_delay(Duration::from_millis(150));
        let started = Instant::now();
        let ack = client
            .place_order(&OrderRequest::limit_buy(40.0, 0.0812))
            .await
            .unwrap();

        assert_eq!(ack.order_id, "C02__9");
        assert!(started.elapsed() >= Duration::from_millis(150));
        mock.assert_async().await;
    }

    #[test]
    fn test_market_order_has_no_price() {
        let client = MexcClient::new("key", "secret", "KASUSDT").unwrap();
        let params = client.order_params(&OrderRequest::market_sell(12.5));

        assert!(params.iter().all(|(k, _)| *k != "price"));
        assert!(params.contains(&("type", "MARKET".to_string())));
        assert!(params.contains(&("quantity", "12.50000000".to_string())));
    }

    #[tokio::test]
    async fn test_cancel_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/api/v3/order")
            .match_query(Matcher::UrlEncoded("orderId".into(), "C02__9".into()))
            .with_status(200)
            .with_body(r#"{"symbol":"KASUSDT","orderId":"C02__9","status":"CANCELED"}"#)
            .create_async()
            .await;

        client_for(&server).cancel_order("C02__9").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_listen_key() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v3/userDataStream")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"listenKey":"pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1"}"#)
            .create_async()
            .await;

        let key = client_for(&server).create_listen_key().await.unwrap();
        assert!(key.starts_with("pqia91"));
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_live_price() {
        let client = MexcClient::new("unused", "unused", "KASUSDT").unwrap();
        let price = client.get_price().await.unwrap();
        assert!(price > 0.0);
    }
}
