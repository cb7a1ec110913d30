// Bitso REST sampler: signed GET of the order book, reduced to best bid / best ask.

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use tracing::{info, instrument, warn};

use super::bitso_types::OrderBookResponse;
use super::{FetchError, NoDataReason, SampleOutcome, SnapshotSource};
use crate::engine::types::Sample;
use crate::market_data::normaliser::Normaliser;
use crate::market_data::signing::{HttpMethod, RequestSigner};

pub struct BitsoAdapter {
    client: reqwest::Client,
    base_url: Url, // e.g. https://stage.bitso.com/api/v3/order_book
    signer: RequestSigner,
    timeout: Duration,
}

impl BitsoAdapter {
    pub fn new(base_url: Url, signer: RequestSigner, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url, signer, timeout })
    }

    fn url_with_query(&self, params: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        url.set_query(None);
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        url
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(err)
        }
    }

    /// Sends a request signed with a fresh nonce. The signature covers the path
    /// plus encoded query, and the body (empty for GET).
    pub async fn signed_request(
        &self,
        method: HttpMethod,
        params: &[(&str, &str)],
        body: &str,
    ) -> Result<reqwest::Response, FetchError> {
        let url = self.url_with_query(params);
        let path_with_query = format!("{}?{}", url.path(), url.query().unwrap_or_default());
        let auth = self.signer.authorization(method, &path_with_query, body)?;

        let request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url).body(body.to_string()),
        };
        request
            .header(AUTHORIZATION, auth)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| self.classify(e))
    }

    pub async fn order_book(&self, book: &str) -> Result<OrderBookResponse, FetchError> {
        let response = self.signed_request(HttpMethod::Get, &[("book", book)], "").await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Reduces a decoded order book to a sample taken at `captured_at`.
pub fn outcome_from(
    response: OrderBookResponse,
    book: &str,
    captured_at: DateTime<Utc>,
) -> Result<SampleOutcome, FetchError> {
    let no_data = |reason| Ok(SampleOutcome::NoData { book: book.to_string(), reason });

    let Some(payload) = response.payload else {
        return no_data(NoDataReason::MissingPayload);
    };
    let (Some(bid), Some(ask)) = (payload.bids.first(), payload.asks.first()) else {
        let reason = if payload.bids.is_empty() { NoDataReason::EmptyBids } else { NoDataReason::EmptyAsks };
        return no_data(reason);
    };

    let best_bid = Normaliser::price(&bid.price)
        .ok_or_else(|| FetchError::Decode(format!("bad bid price {:?}", bid.price)))?;
    let best_ask = Normaliser::price(&ask.price)
        .ok_or_else(|| FetchError::Decode(format!("bad ask price {:?}", ask.price)))?;

    Ok(SampleOutcome::Sample(Sample::from_top_of_book(captured_at, book, best_bid, best_ask)))
}

#[async_trait::async_trait]
impl SnapshotSource for BitsoAdapter {
    #[instrument(level = "debug", skip(self))]
    async fn sample(&self, book: &str) -> Result<SampleOutcome, FetchError> {
        let response = self.order_book(book).await?;
        let captured_at = Utc::now().trunc_subsecs(0);
        let outcome = outcome_from(response, book, captured_at)?;
        match &outcome {
            SampleOutcome::Sample(s) => info!(
                book = %s.book,
                best_bid = s.best_bid,
                best_ask = s.best_ask,
                spread = s.spread,
                "bid-ask spread"
            ),
            SampleOutcome::NoData { reason, .. } => warn!(book, %reason, "no order book data"),
        }
        Ok(outcome)
    }
}
