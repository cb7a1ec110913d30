// Convert wire price values (string or bare JSON number) into f64 prices.

use crate::market_data::adapters::bitso_types::WirePrice;

pub struct Normaliser;

impl Normaliser {
    /// `None` unless the value is a finite, strictly positive number.
    pub fn price(raw: &WirePrice) -> Option<f64> {
        let value = match raw {
            WirePrice::Number(n) => *n,
            WirePrice::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        (value.is_finite() && value > 0.0).then_some(value)
    }
}
