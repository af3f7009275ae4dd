//! Funding rate and contract basis caching.
//!
//! Derivative data lives only in the hot tier: current values as single
//! entries, histories as time-scored series.

use gridfeed_core::{CacheDataType, ContractBasis, DerivativeKey, FundingRate};
use tracing::info;

use crate::tier::HotTier;

/// Derivative data view over a [`HotTier`].
#[derive(Clone, Copy)]
pub struct DerivativeCache<'a> {
    hot: &'a HotTier,
}

impl<'a> DerivativeCache<'a> {
    pub fn new(hot: &'a HotTier) -> Self {
        Self { hot }
    }

    // ---------------------------------------------------------------
    // Funding rate
    // ---------------------------------------------------------------

    pub fn funding_rate(&self, key: &DerivativeKey) -> Option<FundingRate> {
        let data_type = CacheDataType::FundingRate;
        self.hot.get_value(data_type, &key.hot_key(data_type))
    }

    pub fn save_funding_rate(&self, key: &DerivativeKey, rate: &FundingRate) -> bool {
        let data_type = CacheDataType::FundingRate;
        self.hot.set_value(data_type, &key.hot_key(data_type), rate)
    }

    pub fn funding_history(&self, key: &DerivativeKey) -> Option<Vec<FundingRate>> {
        self.hot
            .get_series(&key.hot_key(CacheDataType::FundingHistory))
    }

    /// Replace the cached funding history.
    pub fn save_funding_history(&self, key: &DerivativeKey, history: &[FundingRate]) -> bool {
        let data_type = CacheDataType::FundingHistory;
        self.hot.set_series(data_type, &key.hot_key(data_type), history)
    }

    /// Add one observation to the cached funding history.
    pub fn append_funding_history(&self, key: &DerivativeKey, rate: &FundingRate) -> bool {
        let data_type = CacheDataType::FundingHistory;
        self.hot
            .append(data_type, &key.hot_key(data_type), std::slice::from_ref(rate))
    }

    // ---------------------------------------------------------------
    // Contract basis
    // ---------------------------------------------------------------

    pub fn basis(&self, key: &DerivativeKey) -> Option<ContractBasis> {
        let data_type = CacheDataType::Basis;
        self.hot.get_value(data_type, &key.hot_key(data_type))
    }

    pub fn save_basis(&self, key: &DerivativeKey, basis: &ContractBasis) -> bool {
        let data_type = CacheDataType::Basis;
        self.hot.set_value(data_type, &key.hot_key(data_type), basis)
    }

    pub fn basis_history(&self, key: &DerivativeKey) -> Option<Vec<ContractBasis>> {
        self.hot.get_series(&key.hot_key(CacheDataType::BasisHistory))
    }

    /// Replace the cached basis history.
    pub fn save_basis_history(&self, key: &DerivativeKey, history: &[ContractBasis]) -> bool {
        let data_type = CacheDataType::BasisHistory;
        self.hot.set_series(data_type, &key.hot_key(data_type), history)
    }

    /// Add one observation to the cached basis history.
    pub fn append_basis_history(&self, key: &DerivativeKey, basis: &ContractBasis) -> bool {
        let data_type = CacheDataType::BasisHistory;
        self.hot
            .append(data_type, &key.hot_key(data_type), std::slice::from_ref(basis))
    }

    /// Delete every funding and basis key. Returns the number removed.
    pub fn clear(&self) -> usize {
        let deleted = self.hot.clear_types(&CacheDataType::DERIVATIVES);
        info!(deleted, "cleared derivative cache");
        deleted
    }
}
