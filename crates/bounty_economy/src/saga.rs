//! # Economy Transaction Coordinator
//!
//! **Compensation stack for multi-object writes**
//!
//! Wallet, inventory and durable records are separate collaborators with no
//! shared transaction. A multi-step operation therefore registers an inverse
//! action after every side effect that succeeded:
//!
//! ```text
//! deduct currency  -> push "refund currency"
//! deduct items     -> push "re-grant items (ignore limits)"
//! write record     -> (last step, nothing pushed)
//!
//! failure at step N -> pop and run compensations N-1 .. 1
//! success           -> discard the stack
//! ```
//!
//! ## Guarantees
//!
//! 1. Compensations run in reverse registration order
//! 2. Compensations run even if the caller's context was cancelled
//!    (they receive a fresh background context)
//! 3. A failing compensation is logged and reported through
//!    [`EconomyError::PartiallyCompensated`]; it is never retried
//! 4. Dropping an unfinished stack unwinds it, so `?` early returns are safe
//!
//! The stack lives for one coordinator call only and is never persisted.

use std::collections::BTreeMap;

use tracing::{debug, error, warn};

use crate::context::Context;
use crate::error::{EconomyError, EconomyResult};
use crate::ports::{InventorySystem, WalletLedger};
use crate::reward::{Cost, Metadata};

type Compensation<'a> = Box<dyn FnOnce(&Context) -> Result<(), EconomyError> + 'a>;

/// Stack of inverse actions for one coordinator call.
pub struct CompensationStack<'a> {
    /// Operation name (for logs).
    operation: &'static str,
    /// Registered compensations, oldest first.
    actions: Vec<(String, Compensation<'a>)>,
    /// Whether `commit` or `unwind` already ran.
    finalized: bool,
}

impl<'a> CompensationStack<'a> {
    /// Starts an empty stack for `operation`.
    #[must_use]
    pub fn begin(operation: &'static str) -> Self {
        Self {
            operation,
            actions: Vec::new(),
            finalized: false,
        }
    }

    /// Registers the inverse of a side effect that just succeeded.
    pub fn push(
        &mut self,
        name: impl Into<String>,
        action: impl FnOnce(&Context) -> Result<(), EconomyError> + 'a,
    ) {
        self.actions.push((name.into(), Box::new(action)));
    }

    /// Number of registered compensations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True if nothing needs compensating.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Discards every compensation: the operation succeeded.
    pub fn commit(mut self) {
        debug!(
            operation = self.operation,
            steps = self.actions.len(),
            "compensation stack committed"
        );
        self.actions.clear();
        self.finalized = true;
    }

    /// Runs every compensation in reverse and returns the error to surface.
    ///
    /// Returns `cause` unchanged when all compensations succeeded, otherwise
    /// wraps it in [`EconomyError::PartiallyCompensated`].
    #[must_use]
    pub fn unwind(mut self, cause: EconomyError) -> EconomyError {
        debug!(
            operation = self.operation,
            %cause,
            steps = self.actions.len(),
            "unwinding compensation stack"
        );
        let failures = self.run_compensations();
        self.finalized = true;

        if failures.is_empty() {
            cause
        } else {
            EconomyError::PartiallyCompensated {
                cause: Box::new(cause),
                failures,
            }
        }
    }

    fn run_compensations(&mut self) -> Vec<String> {
        let ctx = Context::background();
        let mut failures = Vec::new();

        while let Some((name, action)) = self.actions.pop() {
            match action(&ctx) {
                Ok(()) => debug!(operation = self.operation, step = %name, "compensation applied"),
                Err(e) => {
                    error!(
                        operation = self.operation,
                        step = %name,
                        error = %e,
                        "compensation failed"
                    );
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        failures
    }
}

impl Drop for CompensationStack<'_> {
    fn drop(&mut self) {
        // If not finalized, auto-unwind
        if !self.finalized && !self.actions.is_empty() {
            warn!(
                operation = self.operation,
                "compensation stack dropped without commit, unwinding"
            );
            // Drop has no caller to report to; each failed step is already logged.
            let _ = self.run_compensations();
        }
    }
}

// ============================================================================
// Cost Deduction
// ============================================================================

/// Deducts `cost` from a user, currency first, registering a compensation
/// after each step that succeeded.
///
/// The item refund grants with `ignore_limits` so limits can never block it.
/// On error the caller unwinds `stack`.
///
/// # Errors
///
/// `FailedPrecondition` if either deduction is refused or item costs are
/// declared without an inventory system; `Cancelled` passes through.
pub(crate) fn deduct_cost<'a>(
    stack: &mut CompensationStack<'a>,
    ctx: &Context,
    wallet: &'a dyn WalletLedger,
    inventory: Option<&'a dyn InventorySystem>,
    user_id: &str,
    cost: &Cost,
    metadata: &Metadata,
) -> EconomyResult<()> {
    if !cost.currencies.is_empty() {
        let debit: BTreeMap<_, _> = cost
            .currencies
            .iter()
            .map(|(id, amount)| (id.clone(), amount.saturating_neg()))
            .collect();
        wallet
            .update(ctx, user_id, &debit, metadata)
            .map_err(|e| refused("currency deduction", e))?;

        let refund = cost.currencies.clone();
        let user = user_id.to_string();
        let metadata = metadata.clone();
        stack.push("refund currencies", move |ctx| {
            wallet.update(ctx, &user, &refund, &metadata).map(|_| ())
        });
    }

    if cost.has_items() {
        let inventory = inventory
            .ok_or_else(|| EconomyError::precondition("item cost requires an inventory system"))?;
        inventory
            .consume_items(ctx, user_id, &cost.items)
            .map_err(|e| refused("item deduction", e))?;

        let items = cost.items.clone();
        let user = user_id.to_string();
        stack.push("re-grant items", move |ctx| {
            inventory.grant_items(ctx, &user, &items, true).map(|_| ())
        });
    }

    Ok(())
}

fn refused(step: &str, e: EconomyError) -> EconomyError {
    match e {
        EconomyError::Cancelled | EconomyError::FailedPrecondition(_) => e,
        other => EconomyError::precondition(format!("{step} failed: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_unwind_runs_in_reverse() {
        let log = Mutex::new(Vec::new());
        let mut stack = CompensationStack::begin("test");
        stack.push("first", |_| {
            log.lock().push("first");
            Ok(())
        });
        stack.push("second", |_| {
            log.lock().push("second");
            Ok(())
        });

        let err = stack.unwind(EconomyError::precondition("boom"));

        assert_eq!(err, EconomyError::precondition("boom"));
        assert_eq!(*log.lock(), vec!["second", "first"]);
    }

    #[test]
    fn test_commit_discards() {
        let log = Mutex::new(Vec::new());
        let mut stack = CompensationStack::begin("test");
        stack.push("first", |_| {
            log.lock().push("first");
            Ok(())
        });
        assert_eq!(stack.len(), 1);
        stack.commit();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_failed_compensation_reported() {
        let log = Mutex::new(Vec::new());
        let mut stack = CompensationStack::begin("test");
        stack.push("refund", |_| {
            log.lock().push("refund");
            Ok(())
        });
        stack.push("regrant", |_| Err(EconomyError::internal("inventory offline")));

        let err = stack.unwind(EconomyError::internal("write failed"));

        // The remaining compensation still ran.
        assert_eq!(*log.lock(), vec!["refund"]);
        match err {
            EconomyError::PartiallyCompensated { cause, failures } => {
                assert_eq!(*cause, EconomyError::internal("write failed"));
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("regrant"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_drop_unwinds() {
        let log = Mutex::new(Vec::new());
        {
            let mut stack = CompensationStack::begin("test");
            stack.push("refund", |_| {
                log.lock().push("refund");
                Ok(())
            });
        }
        assert_eq!(*log.lock(), vec!["refund"]);
    }

    #[test]
    fn test_compensations_get_live_context() {
        let seen = Mutex::new(None);
        let mut stack = CompensationStack::begin("test");
        stack.push("check", |ctx| {
            *seen.lock() = Some(ctx.is_done());
            Ok(())
        });
        let _ = stack.unwind(EconomyError::Cancelled);
        assert_eq!(*seen.lock(), Some(false));
    }

    mod deduction {
        use super::super::*;
        use crate::memory::{MemoryInventory, MemoryWallet};

        fn cost() -> Cost {
            let mut cost = Cost::default();
            cost.currencies.insert("coins".into(), 30);
            cost.items.insert("ore".into(), 2);
            cost
        }

        #[test]
        fn test_item_failure_refunds_currency() {
            let wallet = MemoryWallet::new();
            let inventory = MemoryInventory::new();
            wallet.set_balance("u", "coins", 100);
            let ctx = Context::background();

            let mut stack = CompensationStack::begin("test");
            let items = Some(&inventory as &dyn InventorySystem);
            let result =
                deduct_cost(&mut stack, &ctx, &wallet, items, "u", &cost(), &Metadata::new());
            let err = stack.unwind(result.unwrap_err());

            assert!(matches!(err, EconomyError::FailedPrecondition(_)));
            assert_eq!(wallet.balance("u", "coins"), 100);
        }

        #[test]
        fn test_items_without_inventory() {
            let wallet = MemoryWallet::new();
            wallet.set_balance("u", "coins", 100);

            let mut stack = CompensationStack::begin("test");
            let ctx = Context::background();
            let result =
                deduct_cost(&mut stack, &ctx, &wallet, None, "u", &cost(), &Metadata::new());

            assert!(matches!(result, Err(EconomyError::FailedPrecondition(_))));
            assert_eq!(stack.len(), 1);
            let _ = stack.unwind(EconomyError::precondition("no inventory"));
            assert_eq!(wallet.balance("u", "coins"), 100);
        }

        #[test]
        fn test_success_registers_both_steps() {
            let wallet = MemoryWallet::new();
            let inventory = MemoryInventory::new();
            let ctx = Context::background();
            wallet.set_balance("u", "coins", 100);
            let mut ore = BTreeMap::new();
            ore.insert("ore".to_string(), 5);
            inventory.grant_items(&ctx, "u", &ore, false).unwrap();

            let mut stack = CompensationStack::begin("test");
            let items = Some(&inventory as &dyn InventorySystem);
            deduct_cost(&mut stack, &ctx, &wallet, items, "u", &cost(), &Metadata::new()).unwrap();

            assert_eq!(stack.len(), 2);
            assert_eq!(wallet.balance("u", "coins"), 70);
            assert_eq!(inventory.count("u", "ore"), 3);
            stack.commit();
        }
    }
}
