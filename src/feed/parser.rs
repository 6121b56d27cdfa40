use crate::error::AppError;
use crate::feed::types::TradeEvent;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DecimalWire {
    Text(String),
    Number(f64),
}

impl DecimalWire {
    fn is_blank(&self) -> bool {
        matches!(self, Self::Text(text) if text.trim().is_empty())
    }

    fn to_decimal(&self, field: &str) -> Result<Decimal, AppError> {
        match self {
            Self::Text(text) => {
                let text = text.trim();
                Decimal::from_str(text)
                    .or_else(|_| Decimal::from_scientific(text))
                    .map_err(|_| {
                        AppError::InvalidPayload(format!("{field} '{text}' is not a decimal"))
                    })
            }
            Self::Number(value) => Decimal::from_f64_retain(*value).ok_or_else(|| {
                AppError::InvalidPayload(format!("{field} {value} is not a finite decimal"))
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TradeWire {
    #[serde(rename = "p", default)]
    pub price: Option<DecimalWire>,
    #[serde(rename = "q", default)]
    pub quantity: Option<DecimalWire>,
}

impl TradeWire {
    pub fn into_event(self, observed_at: DateTime<Utc>) -> Result<Option<TradeEvent>, AppError> {
        let price = match self.price {
            Some(price) if !price.is_blank() => price.to_decimal("price")?,
            _ => return Ok(None),
        };
        let quantity = self
            .quantity
            .ok_or_else(|| AppError::InvalidPayload("trade without quantity".to_string()))?
            .to_decimal("quantity")?;

        Ok(Some(TradeEvent::new(price, quantity, observed_at)))
    }
}

pub fn parse_trade_payload(
    payload: &mut [u8],
    observed_at: DateTime<Utc>,
) -> Result<Option<TradeEvent>, AppError> {
    let wire: TradeWire = simd_json::serde::from_slice(payload)?;
    wire.into_event(observed_at)
}
