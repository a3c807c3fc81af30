//! Per-owner, per-token gas accounting for one chain instance.
//!
//! Each account has three buckets: `total_amount` (everything funded or
//! credited), `used_amount` (charged fees) and `locked_amount` (reserved for
//! cross-chain operations that have not been settled yet). Every mutation keeps
//! `used_amount + locked_amount <= total_amount`.
//!
//! Transitions are computed on a copy of the account and only written back
//! when they succeed, so a failed call never leaves a partial update.

use std::collections::HashMap;

use ayara_gmp::{Address, Amount};
use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// GAS ACCOUNT
// ═══════════════════════════════════════════════════════════════════════════════

/// Three-bucket balance of one (owner, token) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasAccount {
    pub total_amount: Amount,
    pub used_amount: Amount,
    pub locked_amount: Amount,
}

impl GasAccount {
    /// `total - used - locked`
    pub fn available(&self) -> Amount {
        self.total_amount
            .saturating_sub(self.used_amount)
            .saturating_sub(self.locked_amount)
    }

    /// `used + locked <= total`
    pub fn is_consistent(&self) -> bool {
        self.used_amount
            .checked_add(self.locked_amount)
            .map(|committed| committed <= self.total_amount)
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        *self == GasAccount::default()
    }

    fn ensure_available(&self, requested: Amount) -> Result<()> {
        let available = self.available();
        if requested > available {
            return Err(ControllerError::InsufficientGasBalance {
                available,
                requested,
            });
        }
        Ok(())
    }

    /// Account after adding `amount` to the total.
    pub fn funded(self, amount: Amount) -> Result<Self> {
        let total_amount = self
            .total_amount
            .checked_add(amount)
            .ok_or(ControllerError::AmountOverflow)?;
        Ok(Self {
            total_amount,
            ..self
        })
    }

    /// Account after charging `fee` as used.
    pub fn charged(self, fee: Amount) -> Result<Self> {
        self.ensure_available(fee)?;
        Ok(Self {
            used_amount: self.used_amount + fee,
            ..self
        })
    }

    /// Account after reserving `amount` for a cross-chain operation.
    pub fn locked(self, amount: Amount) -> Result<Self> {
        self.ensure_available(amount)?;
        Ok(Self {
            locked_amount: self.locked_amount + amount,
            ..self
        })
    }

    /// Account after releasing `amount` of the reservation.
    pub fn unlocked(self, amount: Amount) -> Result<Self> {
        let locked_amount = self.locked_amount.checked_sub(amount).ok_or(
            ControllerError::UnlockExceedsLocked {
                locked: self.locked_amount,
                requested: amount,
            },
        )?;
        Ok(Self {
            locked_amount,
            ..self
        })
    }

    /// How much of an allocation of `allocated` counts as consumed when it is
    /// removed from this account: at least `charged`, and enough that what
    /// remains is consistent. Gas spent locally on the destination draws on
    /// the allocation once the account's other balance is exhausted.
    pub fn consumed_share(&self, allocated: Amount, charged: Amount) -> Amount {
        allocated
            .saturating_sub(self.available())
            .max(charged)
            .min(allocated)
            .min(self.used_amount)
    }

    /// Account after removing a settled allocation of `allocated` of which
    /// `used` was consumed.
    pub fn released(self, allocated: Amount, used: Amount) -> Result<Self> {
        let exceeds = || ControllerError::SettlementExceedsAllocation { allocated, used };
        if used > allocated {
            return Err(exceeds());
        }
        let next = Self {
            total_amount: self.total_amount.checked_sub(allocated).ok_or_else(exceeds)?,
            used_amount: self.used_amount.checked_sub(used).ok_or_else(exceeds)?,
            locked_amount: self.locked_amount,
        };
        if !next.is_consistent() {
            return Err(ControllerError::InsufficientGasBalance {
                available: self.available(),
                requested: allocated - used,
            });
        }
        Ok(next)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GAS LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Charge and lock checked against the ledger, not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDebit {
    owner: Address,
    token: Address,
    account: GasAccount,
    relayer: Address,
    relayer_fee: Amount,
    earmark: Amount,
}

impl PendingDebit {
    /// Account as it will be once applied
    pub fn account(&self) -> &GasAccount {
        &self.account
    }
}

/// Gas ledger of one chain instance, with the gas-token allow-list.
#[derive(Debug, Clone, Default)]
pub struct GasLedger {
    accounts: HashMap<(Address, Address), GasAccount>,
    gas_tokens: HashMap<Address, bool>,
    /// Fees earmarked per (relayer, token)
    relayer_earmarks: HashMap<(Address, Address), Amount>,
}

impl GasLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── allow-list ────────────────────────────────────────────────────────────

    pub fn is_gas_token(&self, token: &Address) -> bool {
        self.gas_tokens.get(token).copied().unwrap_or(false)
    }

    pub fn ensure_gas_token(&self, token: &Address) -> Result<()> {
        if !self.is_gas_token(token) {
            return Err(ControllerError::NotApprovedGasToken(*token));
        }
        Ok(())
    }

    pub fn set_gas_tokens(&mut self, tokens: &[Address], allowed: bool) {
        for token in tokens {
            self.gas_tokens.insert(*token, allowed);
        }
    }

    /// Allow-listed tokens, sorted
    pub fn gas_tokens(&self) -> Vec<Address> {
        let mut tokens: Vec<_> = self
            .gas_tokens
            .iter()
            .filter(|(_, allowed)| **allowed)
            .map(|(token, _)| *token)
            .collect();
        tokens.sort();
        tokens
    }

    // ─── accounts ──────────────────────────────────────────────────────────────

    /// Current account, all zero if it was never funded.
    pub fn account(&self, owner: &Address, token: &Address) -> GasAccount {
        self.accounts
            .get(&(*owner, *token))
            .copied()
            .unwrap_or_default()
    }

    /// Write back an account computed by one of the `GasAccount` transitions.
    pub fn commit(&mut self, owner: Address, token: Address, account: GasAccount) {
        debug_assert!(account.is_consistent());
        self.accounts.insert((owner, token), account);
    }

    pub fn relayer_earmark(&self, relayer: &Address, token: &Address) -> Amount {
        self.relayer_earmarks
            .get(&(*relayer, *token))
            .copied()
            .unwrap_or(0)
    }

    // ─── operations ────────────────────────────────────────────────────────────

    /// Add funded tokens to the owner's total. The token must be allow-listed.
    pub fn fund(&mut self, owner: Address, token: Address, amount: Amount) -> Result<GasAccount> {
        self.ensure_gas_token(&token)?;
        let next = self.account(&owner, &token).funded(amount)?;
        self.commit(owner, token, next);
        Ok(next)
    }

    /// Credit a cross-chain allocation. No custody moves on this chain; the
    /// value stays locked on the origin.
    pub fn credit(&mut self, owner: Address, token: Address, amount: Amount) -> Result<GasAccount> {
        let next = self.account(&owner, &token).funded(amount)?;
        self.commit(owner, token, next);
        Ok(next)
    }

    /// Mark `fee` as used and earmark `relayer_fee` of it for `relayer`.
    pub fn charge(
        &mut self,
        owner: Address,
        token: Address,
        fee: Amount,
        relayer: Address,
        relayer_fee: Amount,
    ) -> Result<GasAccount> {
        let debit = self.prepare_debit(owner, token, fee, relayer, relayer_fee, 0)?;
        Ok(self.apply_debit(debit))
    }

    /// Check a charge followed by a lock without applying it. The returned
    /// debit is applied with [`GasLedger::apply_debit`], which cannot fail.
    pub fn prepare_debit(
        &self,
        owner: Address,
        token: Address,
        fee: Amount,
        relayer: Address,
        relayer_fee: Amount,
        lock: Amount,
    ) -> Result<PendingDebit> {
        if relayer_fee > fee {
            return Err(ControllerError::RelayerFeeExceedsMaxFee {
                max_fee: fee,
                relayer_fee,
            });
        }
        let account = self.account(&owner, &token).charged(fee)?.locked(lock)?;
        let earmark = self
            .relayer_earmark(&relayer, &token)
            .checked_add(relayer_fee)
            .ok_or(ControllerError::AmountOverflow)?;
        Ok(PendingDebit {
            owner,
            token,
            account,
            relayer,
            relayer_fee,
            earmark,
        })
    }

    pub fn apply_debit(&mut self, debit: PendingDebit) -> GasAccount {
        self.commit(debit.owner, debit.token, debit.account);
        if debit.relayer_fee > 0 {
            self.relayer_earmarks
                .insert((debit.relayer, debit.token), debit.earmark);
        }
        debit.account
    }

    pub fn lock(&mut self, owner: Address, token: Address, amount: Amount) -> Result<GasAccount> {
        let next = self.account(&owner, &token).locked(amount)?;
        self.commit(owner, token, next);
        Ok(next)
    }

    pub fn unlock(&mut self, owner: Address, token: Address, amount: Amount) -> Result<GasAccount> {
        let next = self.account(&owner, &token).unlocked(amount)?;
        self.commit(owner, token, next);
        Ok(next)
    }

    /// Origin side of settlement: unlock the unused share of an allocation and
    /// return it.
    pub fn settle(
        &mut self,
        owner: Address,
        token: Address,
        allocated: Amount,
        used_on_remote: Amount,
    ) -> Result<Amount> {
        let amount_to_unlock = allocated.checked_sub(used_on_remote).ok_or(
            ControllerError::SettlementExceedsAllocation {
                allocated,
                used: used_on_remote,
            },
        )?;
        self.unlock(owner, token, amount_to_unlock)?;
        Ok(amount_to_unlock)
    }

    /// Destination side of settlement: drop a single-use allocation from the
    /// account.
    pub fn release(
        &mut self,
        owner: Address,
        token: Address,
        allocated: Amount,
        used: Amount,
    ) -> Result<GasAccount> {
        let next = self.account(&owner, &token).released(allocated, used)?;
        self.commit(owner, token, next);
        Ok(next)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
