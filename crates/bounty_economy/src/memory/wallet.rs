//! Per-user currency wallet.

use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::context::Context;
use crate::error::{EconomyError, EconomyResult};
use crate::ports::{WalletLedger, WalletUpdate};
use crate::reward::{CurrencyId, Metadata};

#[derive(Debug, Default)]
struct WalletState {
    balances: BTreeMap<String, BTreeMap<CurrencyId, i64>>,
    /// Successful updates left before the injected failure fires.
    fail_after: Option<u32>,
    updates: u64,
}

/// In-memory [`WalletLedger`]. Rejects updates that would overdraw.
#[derive(Debug, Default)]
pub struct MemoryWallet {
    state: Mutex<WalletState>,
}

impl MemoryWallet {
    /// Creates an empty wallet ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a balance directly.
    pub fn set_balance(&self, user_id: &str, currency: &str, amount: i64) {
        self.state
            .lock()
            .balances
            .entry(user_id.to_string())
            .or_default()
            .insert(currency.to_string(), amount);
    }

    /// Current balance, `0` when unknown.
    #[must_use]
    pub fn balance(&self, user_id: &str, currency: &str) -> i64 {
        self.state
            .lock()
            .balances
            .get(user_id)
            .and_then(|w| w.get(currency))
            .copied()
            .unwrap_or(0)
    }

    /// Every balance of a user.
    #[must_use]
    pub fn balances(&self, user_id: &str) -> BTreeMap<CurrencyId, i64> {
        self.state.lock().balances.get(user_id).cloned().unwrap_or_default()
    }

    /// Fails the next update.
    pub fn fail_next_update(&self) {
        self.fail_update_after(0);
    }

    /// Lets `successes` updates through, then fails one.
    pub fn fail_update_after(&self, successes: u32) {
        self.state.lock().fail_after = Some(successes);
    }

    /// Number of updates applied.
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.state.lock().updates
    }
}

impl WalletLedger for MemoryWallet {
    fn update(
        &self,
        ctx: &Context,
        user_id: &str,
        deltas: &BTreeMap<CurrencyId, i64>,
        _metadata: &Metadata,
    ) -> EconomyResult<WalletUpdate> {
        ctx.check()?;
        let mut state = self.state.lock();

        match state.fail_after {
            Some(0) => {
                state.fail_after = None;
                return Err(EconomyError::internal("wallet unavailable"));
            }
            Some(n) => state.fail_after = Some(n - 1),
            None => {}
        }

        let previous = state.balances.get(user_id).cloned().unwrap_or_default();
        let mut updated = previous.clone();
        for (currency, delta) in deltas {
            let balance = updated.entry(currency.clone()).or_insert(0);
            *balance = balance
                .checked_add(*delta)
                .ok_or_else(|| EconomyError::invalid(format!("{currency} balance overflow")))?;
            if *balance < 0 {
                return Err(EconomyError::precondition(format!("insufficient {currency}")));
            }
        }

        state.balances.insert(user_id.to_string(), updated.clone());
        state.updates += 1;
        Ok(WalletUpdate { updated, previous })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deltas(pairs: &[(&str, i64)]) -> BTreeMap<CurrencyId, i64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn test_update_is_all_or_nothing() {
        let wallet = MemoryWallet::new();
        let ctx = Context::background();
        wallet.set_balance("u", "coins", 10);
        wallet.set_balance("u", "gems", 1);

        let deltas = deltas(&[("coins", -5), ("gems", -2)]);
        let result = wallet.update(&ctx, "u", &deltas, &Metadata::new());

        assert!(matches!(result, Err(EconomyError::FailedPrecondition(_))));
        assert_eq!(wallet.balance("u", "coins"), 10);
        assert_eq!(wallet.balance("u", "gems"), 1);
    }

    #[test]
    fn test_update_reports_previous() {
        let wallet = MemoryWallet::new();
        wallet.set_balance("u", "coins", 10);

        let update = wallet
            .update(&Context::background(), "u", &deltas(&[("coins", 5)]), &Metadata::new())
            .unwrap();

        assert_eq!(update.previous["coins"], 10);
        assert_eq!(update.updated["coins"], 15);
    }

    #[test]
    fn test_fail_update_after() {
        let wallet = MemoryWallet::new();
        let ctx = Context::background();
        wallet.fail_update_after(1);

        assert!(wallet.update(&ctx, "u", &deltas(&[("coins", 1)]), &Metadata::new()).is_ok());
        assert!(wallet.update(&ctx, "u", &deltas(&[("coins", 1)]), &Metadata::new()).is_err());
        assert!(wallet.update(&ctx, "u", &deltas(&[("coins", 1)]), &Metadata::new()).is_ok());
        assert_eq!(wallet.balance("u", "coins"), 2);
    }
}
