//! Currencies and minor-unit amounts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

/// Currencies an account may be denominated in.
///
/// Balances and amounts are always integers in the currency's minor unit
/// (cents for all currently supported currencies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Cad,
}

impl Currency {
    /// All supported currencies.
    pub const ALL: [Currency; 3] = [Currency::Usd, Currency::Eur, Currency::Cad];

    /// ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Cad => "CAD",
        }
    }

    /// Number of minor-unit digits.
    pub fn decimal_places(&self) -> u32 {
        2
    }

    /// Render a minor-unit amount for display, e.g. `-930` USD as `-9.30 USD`.
    pub fn format_minor(&self, amount: i64) -> String {
        let scale = 10i64.pow(self.decimal_places());
        let sign = if amount < 0 { "-" } else { "" };
        let abs = amount.unsigned_abs();
        format!(
            "{}{}.{:0width$} {}",
            sign,
            abs / scale as u64,
            abs % scale as u64,
            self.code(),
            width = self.decimal_places() as usize
        )
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "CAD" => Ok(Currency::Cad),
            _ => Err(LedgerError::UnsupportedCurrency(s.to_string())),
        }
    }
}

/// Check that a transfer amount is a strictly positive number of minor units.
pub fn validate_transfer_amount(amount: i64) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_parse() {
        assert_eq!("USD".parse::<Currency>().unwrap(), Currency::Usd);
        assert_eq!("eur".parse::<Currency>().unwrap(), Currency::Eur);
        assert!(matches!(
            "GBP".parse::<Currency>(),
            Err(LedgerError::UnsupportedCurrency(_))
        ));
    }

    #[test]
    fn test_currency_serde_uses_codes() {
        assert_eq!(serde_json::to_string(&Currency::Cad).unwrap(), "\"CAD\"");
        let parsed: Currency = serde_json::from_str("\"USD\"").unwrap();
        assert_eq!(parsed, Currency::Usd);
    }

    #[test]
    fn test_format_minor() {
        assert_eq!(Currency::Usd.format_minor(7000), "70.00 USD");
        assert_eq!(Currency::Usd.format_minor(-930), "-9.30 USD");
        assert_eq!(Currency::Eur.format_minor(5), "0.05 EUR");
    }

    #[test]
    fn test_validate_transfer_amount() {
        assert!(validate_transfer_amount(1).is_ok());
        assert_eq!(validate_transfer_amount(0), Err(LedgerError::InvalidAmount(0)));
        assert_eq!(validate_transfer_amount(-5), Err(LedgerError::InvalidAmount(-5)));
    }
}
