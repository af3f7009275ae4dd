//! Derivative market records: funding rates and contract basis.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{CacheDataType, TimestampSecs, Timestamped};

/// Contract type used when a basis key names none.
pub const DEFAULT_CONTRACT_TYPE: &str = "perpetual";

/// One funding rate observation of a perpetual contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRate {
    /// Observation time (seconds).
    pub time: TimestampSecs,
    pub funding_rate: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_funding_time: Option<TimestampSecs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_funding_rate: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_price: Option<Decimal>,
}

impl FundingRate {
    pub fn new(time: TimestampSecs, funding_rate: Decimal) -> Self {
        Self {
            time,
            funding_rate,
            next_funding_time: None,
            predicted_funding_rate: None,
            index_price: None,
        }
    }

    pub fn with_next_funding(mut self, next_funding_time: TimestampSecs, predicted: Option<Decimal>) -> Self {
        self.next_funding_time = Some(next_funding_time);
        self.predicted_funding_rate = predicted;
        self
    }

    pub fn with_index_price(mut self, index_price: Decimal) -> Self {
        self.index_price = Some(index_price);
        self
    }
}

impl Timestamped for FundingRate {
    fn timestamp(&self) -> TimestampSecs {
        self.time
    }
}

/// Spread between a contract and its reference (spot or index) price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractBasis {
    pub time: TimestampSecs,
    /// `contract_price - reference_price`.
    pub basis: Decimal,
    /// `basis / reference_price`, zero when the reference is zero.
    pub basis_rate: Decimal,
    pub contract_price: Decimal,
    pub reference_price: Decimal,
}

impl ContractBasis {
    pub fn new(time: TimestampSecs, contract_price: Decimal, reference_price: Decimal) -> Self {
        let basis = contract_price - reference_price;
        Self {
            time,
            basis,
            basis_rate: basis.checked_div(reference_price).unwrap_or(Decimal::ZERO),
            contract_price,
            reference_price,
        }
    }
}

impl Timestamped for ContractBasis {
    fn timestamp(&self) -> TimestampSecs {
        self.time
    }
}

/// Identifies the funding and basis data of one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivativeKey {
    pub source: String,
    pub symbol: String,
    /// Only part of basis keys.
    pub contract_type: String,
}

impl DerivativeKey {
    /// Key for the perpetual contract of `symbol`.
    pub fn new(source: impl AsRef<str>, symbol: impl AsRef<str>) -> Self {
        Self {
            source: source.as_ref().to_ascii_lowercase(),
            symbol: symbol.as_ref().to_ascii_uppercase(),
            contract_type: DEFAULT_CONTRACT_TYPE.to_string(),
        }
    }

    pub fn with_contract_type(mut self, contract_type: impl AsRef<str>) -> Self {
        self.contract_type = contract_type.as_ref().to_ascii_lowercase();
        self
    }

    /// Hot tier key, e.g. `funding_rate:okx:BTCUSDT` or
    /// `basis_history:okx:BTCUSDT:perpetual`.
    pub fn hot_key(&self, data_type: CacheDataType) -> String {
        match data_type {
            CacheDataType::Basis | CacheDataType::BasisHistory => format!(
                "{}:{}:{}:{}",
                data_type, self.source, self.symbol, self.contract_type
            ),
            _ => format!("{}:{}:{}", data_type, self.source, self.symbol),
        }
    }
}
