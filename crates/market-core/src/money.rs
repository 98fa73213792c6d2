//! # Money Types
//!
//! Currency and price types. Amounts are always held in the smallest
//! currency unit (cents for USD) so checkout arithmetic never touches floats.

use crate::error::{MarketError, MarketResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    #[default]
    USD,
    EUR,
    GBP,
    JPY,
    CAD,
    AUD,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "usd",
            Currency::EUR => "eur",
            Currency::GBP => "gbp",
            Currency::JPY => "jpy",
            Currency::CAD => "cad",
            Currency::AUD => "aud",
        }
    }

    /// Returns the number of decimal places for this currency
    /// (JPY has 0 decimals, the others have 2)
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
            Currency::JPY => "¥",
            Currency::CAD => "C$",
            Currency::AUD => "A$",
        }
    }
}

impl FromStr for Currency {
    type Err = MarketError;

    fn from_str(s: &str) -> MarketResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "usd" => Ok(Currency::USD),
            "eur" => Ok(Currency::EUR),
            "gbp" => Ok(Currency::GBP),
            "jpy" => Ok(Currency::JPY),
            "cad" => Ok(Currency::CAD),
            "aud" => Ok(Currency::AUD),
            other => Err(MarketError::field(
                "currency",
                format!("unsupported currency: {other}"),
            )),
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Price with amount in smallest currency unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in smallest currency unit (cents for USD)
    pub amount: i64,
    /// Currency
    pub currency: Currency,
}

impl Price {
    /// Create a price from smallest unit (cents)
    pub fn from_cents(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Format for display (e.g., "$10.00")
    pub fn display(&self) -> String {
        let places = self.currency.decimal_places();
        if places == 0 {
            return format!("{}{}", self.currency.symbol(), self.amount);
        }
        let divisor = 10_i64.pow(places);
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.abs();
        format!(
            "{}{}{}.{:0width$}",
            sign,
            self.currency.symbol(),
            abs / divisor,
            abs % divisor,
            width = places as usize
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_display() {
        assert_eq!(Price::from_cents(2999, Currency::USD).display(), "$29.99");
        assert_eq!(Price::from_cents(1905, Currency::EUR).display(), "€19.05");
        assert_eq!(Price::from_cents(1000, Currency::JPY).display(), "¥1000");
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!("USD".parse::<Currency>().unwrap(), Currency::USD);
        assert_eq!("gbp".parse::<Currency>().unwrap(), Currency::GBP);
        assert!("xyz".parse::<Currency>().is_err());
    }
}
