//! Per-instrument trade targets.
//!
//! The prices file maps a display key to the instrument and its targets:
//!
//! ```yaml
//! apple:
//!   name: BBG000B9XRY4
//!   buy: 120.5
//!   sell: 131.0
//! ```

use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::warn;

use crate::error::ConfigError;

/// Buy/sell targets for one instrument. Immutable for the run.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeConfig {
    /// Key the entry is listed under in the prices file
    pub key: String,
    /// Opaque instrument identifier used by the feed and the markers
    pub instrument_id: String,
    /// Buy once the price is at or below this level
    pub price_to_buy: Decimal,
    /// Sell once the price is at or above this level
    pub price_to_sell: Decimal,
    /// Order quantity handed to the executor
    pub quantity: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawTradeEntry {
    name: String,
    buy: Decimal,
    sell: Decimal,
    #[serde(default = "default_quantity")]
    quantity: Decimal,
}

fn default_quantity() -> Decimal {
    Decimal::ONE
}

/// Load and validate the prices file.
pub fn load_trade_configs(path: &Path) -> Result<Vec<TradeConfig>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingFile(path.to_path_buf()));
    }
    let name = path
        .to_str()
        .ok_or_else(|| ConfigError::Invalid(format!("non UTF-8 path {:?}", path)))?;

    let raw: BTreeMap<String, RawTradeEntry> = config::Config::builder()
        .add_source(config::File::new(name, config::FileFormat::Yaml))
        .build()?
        .try_deserialize()?;

    build(raw)
}

/// Parse prices from a YAML string.
pub fn parse_trade_configs(yaml: &str) -> Result<Vec<TradeConfig>, ConfigError> {
    let raw: BTreeMap<String, RawTradeEntry> = config::Config::builder()
        .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
        .build()?
        .try_deserialize()?;

    build(raw)
}

fn build(raw: BTreeMap<String, RawTradeEntry>) -> Result<Vec<TradeConfig>, ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::Invalid("prices file lists no instruments".to_string()));
    }

    let mut seen = HashSet::new();
    let mut trades = Vec::with_capacity(raw.len());

    for (key, entry) in raw {
        let instrument_id = entry.name.trim().to_string();
        validate_instrument_id(&key, &instrument_id)?;

        if entry.buy <= Decimal::ZERO || entry.sell <= Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "{key}: buy and sell prices must be positive"
            )));
        }
        if entry.quantity <= Decimal::ZERO {
            return Err(ConfigError::Invalid(format!("{key}: quantity must be positive")));
        }
        if entry.sell <= entry.buy {
            warn!(
                %key,
                buy = %entry.buy,
                sell = %entry.sell,
                "Sell target is not above buy target, the deal cannot make a profit"
            );
        }
        if !seen.insert(instrument_id.clone()) {
            return Err(ConfigError::Invalid(format!(
                "instrument {instrument_id} is listed more than once"
            )));
        }

        trades.push(TradeConfig {
            key,
            instrument_id,
            price_to_buy: entry.buy,
            price_to_sell: entry.sell,
            quantity: entry.quantity,
        });
    }

    reject_shared_prefixes(&trades)?;
    Ok(trades)
}

/// Markers are matched by `<id>_`, so no id may start with another id
/// followed by `_`.
fn reject_shared_prefixes(trades: &[TradeConfig]) -> Result<(), ConfigError> {
    for trade in trades {
        let prefix = format!("{}_", trade.instrument_id);
        if let Some(other) = trades
            .iter()
            .find(|other| other.instrument_id.starts_with(&prefix))
        {
            return Err(ConfigError::Invalid(format!(
                "instrument {} overlaps {}: marker files could not be told apart",
                other.instrument_id, trade.instrument_id
            )));
        }
    }
    Ok(())
}

/// Instrument ids become file name prefixes, so they must be plain names.
fn validate_instrument_id(key: &str, instrument_id: &str) -> Result<(), ConfigError> {
    if instrument_id.is_empty() {
        return Err(ConfigError::Invalid(format!("{key}: name is empty")));
    }
    if instrument_id.starts_with('.')
        || instrument_id.contains(['/', '\\'])
        || instrument_id.chars().any(char::is_control)
    {
        return Err(ConfigError::Invalid(format!(
            "{key}: name '{instrument_id}' cannot be used as a file name prefix"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_parse_prices() {
        let trades = parse_trade_configs(
            "apple:\n  name: BBG000B9XRY4\n  buy: 120.5\n  sell: 131\n\
             tesla:\n  name: BBG000N9MNX3\n  buy: \"600\"\n  sell: \"700\"\n  quantity: 3\n",
        )
        .unwrap();

        assert_eq!(trades.len(), 2);
        let apple = trades.iter().find(|t| t.instrument_id == "BBG000B9XRY4").unwrap();
        assert_eq!(apple.price_to_buy, dec!(120.5));
        assert_eq!(apple.price_to_sell, dec!(131));
        assert_eq!(apple.quantity, Decimal::ONE);

        let tesla = trades.iter().find(|t| t.instrument_id == "BBG000N9MNX3").unwrap();
        assert_eq!(tesla.price_to_buy, dec!(600));
        assert_eq!(tesla.quantity, dec!(3));
    }

    #[test]
    fn test_missing_field_is_config_error() {
        let err = parse_trade_configs("apple:\n  name: BBG000B9XRY4\n  buy: 120\n").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_duplicate_instrument_is_rejected() {
        let err = parse_trade_configs(
            "a:\n  name: FIGI\n  buy: 1\n  sell: 2\nb:\n  name: FIGI\n  buy: 1\n  sell: 2\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("more than once")));
    }

    #[test]
    fn test_instrument_sharing_a_marker_prefix_is_rejected() {
        let err = parse_trade_configs(
            "a:\n  name: AAA\n  buy: 1\n  sell: 2\nb:\n  name: AAA_B\n  buy: 1\n  sell: 2\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("AAA_B overlaps AAA")));

        let trades = parse_trade_configs(
            "a:\n  name: AAA\n  buy: 1\n  sell: 2\nb:\n  name: AAAB\n  buy: 1\n  sell: 2\n",
        )
        .unwrap();
        assert_eq!(trades.len(), 2);
    }

    #[test]
    fn test_path_like_instrument_is_rejected() {
        let err =
            parse_trade_configs("a:\n  name: ../escape\n  buy: 1\n  sell: 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_non_positive_price_is_rejected() {
        let err = parse_trade_configs("a:\n  name: FIGI\n  buy: 0\n  sell: 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "apple:\n  name: BBG000B9XRY4\n  buy: 10\n  sell: 12").unwrap();

        let trades = load_trade_configs(file.path()).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].instrument_id, "BBG000B9XRY4");

        let missing = load_trade_configs(Path::new("/nonexistent/prices.yml")).unwrap_err();
        assert!(matches!(missing, ConfigError::MissingFile(_)));
    }
}
