// Source: GET /api/v3/order_book?book=<book>
// Only the fields the sampler reads are typed; everything else is ignored.

#[derive(Debug, serde::Deserialize)]
pub struct OrderBookResponse {
    #[serde(default)]
    pub payload: Option<OrderBookPayload>,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct OrderBookPayload {
    #[serde(default)]
    pub bids: Vec<PriceLevel>, // best (highest) first
    #[serde(default)]
    pub asks: Vec<PriceLevel>, // best (lowest) first
}

#[derive(Debug, serde::Deserialize)]
pub struct PriceLevel {
    pub price: WirePrice,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(untagged)]
pub enum WirePrice {
    Text(String),
    Number(f64),
}
