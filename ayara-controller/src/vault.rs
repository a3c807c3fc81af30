//! Token custody backing `fund`.

use std::collections::HashMap;

use ayara_gmp::{Address, Amount};

use crate::error::{ControllerError, Result};

/// Token balances the controller can pull from and hold.
pub trait TokenCustody: Send {
    fn balance_of(&self, token: &Address, holder: &Address) -> Amount;

    /// Move `amount` of `token` between holders. Fails without moving
    /// anything when `from` cannot cover it.
    fn transfer(&mut self, token: &Address, from: &Address, to: &Address, amount: Amount)
        -> Result<()>;

    /// Credit `amount` to `holder` from outside the protocol (faucet, bridge in).
    fn deposit(&mut self, token: Address, holder: Address, amount: Amount) -> Result<Amount>;
}

/// In-memory balances keyed by (token, holder).
#[derive(Debug, Clone, Default)]
pub struct TokenVault {
    balances: HashMap<(Address, Address), Amount>,
}

impl TokenVault {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenCustody for TokenVault {
    fn balance_of(&self, token: &Address, holder: &Address) -> Amount {
        self.balances.get(&(*token, *holder)).copied().unwrap_or(0)
    }

    fn transfer(
        &mut self,
        token: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<()> {
        let from_balance = self.balance_of(token, from);
        if from_balance < amount {
            return Err(ControllerError::InsufficientTokenBalance {
                holder: *from,
                balance: from_balance,
                requested: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        let to_balance = self
            .balance_of(token, to)
            .checked_add(amount)
            .ok_or(ControllerError::AmountOverflow)?;

        self.balances.insert((*token, *from), from_balance - amount);
        self.balances.insert((*token, *to), to_balance);
        Ok(())
    }

    fn deposit(&mut self, token: Address, holder: Address, amount: Amount) -> Result<Amount> {
        let balance = self.balances.entry((token, holder)).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(ControllerError::AmountOverflow)?;
        Ok(*balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: Address = Address([0xaa; 20]);
    const ALICE: Address = Address([0x01; 20]);
    const VAULT: Address = Address([0x02; 20]);

    #[test]
    fn test_transfer_moves_balance() {
        let mut vault = TokenVault::new();
        vault.deposit(TOKEN, ALICE, 100).unwrap();
        vault.transfer(&TOKEN, &ALICE, &VAULT, 40).unwrap();

        assert_eq!(vault.balance_of(&TOKEN, &ALICE), 60);
        assert_eq!(vault.balance_of(&TOKEN, &VAULT), 40);
    }

    #[test]
    fn test_transfer_insufficient_balance() {
        let mut vault = TokenVault::new();
        vault.deposit(TOKEN, ALICE, 10).unwrap();

        let err = vault.transfer(&TOKEN, &ALICE, &VAULT, 11).unwrap_err();
        assert!(matches!(
            err,
            ControllerError::InsufficientTokenBalance { balance: 10, requested: 11, .. }
        ));
        assert_eq!(vault.balance_of(&TOKEN, &ALICE), 10);
        assert_eq!(vault.balance_of(&TOKEN, &VAULT), 0);
    }
}
