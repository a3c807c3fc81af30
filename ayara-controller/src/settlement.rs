//! Lifecycle of cross-chain fee allocations.
//!
//! An allocation moves through
//! `Locked (origin) → Pending (destination) → Executed (destination)
//!  → SettlementInitiated (destination) → Unlocked (origin)`.
//! Each side tracks its half: the origin keeps [`OutboundAllocation`]s for
//! gas it locked, the destination keeps [`InboundAllocation`]s for gas it was
//! credited. The coordinator drives the ledger at every step so the bucket
//! arithmetic and the phase bookkeeping cannot drift apart.

use std::collections::HashMap;

use ayara_gmp::{Address, Amount, ChainId, SettlementReport};
use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};
use crate::ledger::GasLedger;

// ═══════════════════════════════════════════════════════════════════════════════
// PHASES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationPhase {
    /// Origin reserved the gas and sent the operation
    Locked,
    /// Destination holds the credited allocation
    Pending,
    /// Destination charged part of the allocation
    Executed,
    /// Destination reported usage back to the origin
    SettlementInitiated,
    /// Origin released the unused share
    Unlocked,
}

impl AllocationPhase {
    pub fn can_transition_to(&self, next: AllocationPhase) -> bool {
        use AllocationPhase::*;
        matches!(
            (self, next),
            // origin side; a new lock reopens a settled allocation
            (Locked, Locked)
                | (Locked, Unlocked)
                | (Unlocked, Locked)
                // destination side; further operations top up the allocation
                | (Pending, Pending)
                | (Pending, Executed)
                | (Executed, Pending)
                | (Executed, Executed)
                | (Pending, SettlementInitiated)
                | (Executed, SettlementInitiated)
                | (SettlementInitiated, Pending)
        )
    }

    fn advance(&mut self, next: AllocationPhase) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(ControllerError::InvalidPhaseTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Key of an allocation on the origin: (owner, source token, destination chain).
pub type OutboundKey = (Address, Address, ChainId);

/// Key of an allocation on the destination:
/// (owner, destination token, origin chain, source token).
pub type InboundKey = (Address, Address, ChainId, Address);

/// Origin-side record of locked gas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundAllocation {
    pub phase: AllocationPhase,
    /// Gas currently locked for this destination
    pub locked: Amount,
    /// Gas reported consumed by the destination over all settlements
    pub consumed_remotely: Amount,
}

/// Destination-side record of credited gas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundAllocation {
    pub phase: AllocationPhase,
    /// Controller on the origin chain that sent the allocation
    pub origin_controller: Address,
    pub allocated: Amount,
    pub used: Amount,
}

/// Settlement prepared on the destination, ready to be sent to the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSettlement {
    pub origin_chain_id: ChainId,
    pub origin_controller: Address,
    pub report: SettlementReport,
}

// ═══════════════════════════════════════════════════════════════════════════════
// COORDINATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Allocation bookkeeping for one chain instance.
#[derive(Debug, Clone, Default)]
pub struct SettlementCoordinator {
    outbound: HashMap<OutboundKey, OutboundAllocation>,
    inbound: HashMap<InboundKey, InboundAllocation>,
}

impl SettlementCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbound(&self, owner: &Address, token: &Address, destination: ChainId) -> Option<&OutboundAllocation> {
        self.outbound.get(&(*owner, *token, destination))
    }

    pub fn inbound(
        &self,
        owner: &Address,
        token: &Address,
        origin: ChainId,
        source_token: &Address,
    ) -> Option<&InboundAllocation> {
        self.inbound.get(&(*owner, *token, origin, *source_token))
    }

    // ─── origin ────────────────────────────────────────────────────────────────

    /// Record gas locked in the ledger for an operation sent to `destination`.
    pub fn record_lock(
        &mut self,
        owner: Address,
        token: Address,
        destination: ChainId,
        amount: Amount,
    ) -> Result<()> {
        let entry = self
            .outbound
            .entry((owner, token, destination))
            .or_insert(OutboundAllocation {
                phase: AllocationPhase::Locked,
                locked: 0,
                consumed_remotely: 0,
            });
        let locked = entry
            .locked
            .checked_add(amount)
            .ok_or(ControllerError::AmountOverflow)?;
        entry.phase.advance(AllocationPhase::Locked)?;
        entry.locked = locked;
        Ok(())
    }

    /// Apply a settlement report from `destination`: unlock the unused share
    /// in the ledger and return it.
    pub fn apply_settlement(
        &mut self,
        ledger: &mut GasLedger,
        destination: ChainId,
        report: &SettlementReport,
    ) -> Result<Amount> {
        let key = (report.owner, report.source_token, destination);
        let record = self
            .outbound
            .get(&key)
            .ok_or(ControllerError::NoPendingAllocation {
                owner: report.owner,
                token: report.source_token,
                origin_chain_id: destination,
            })?;
        let remaining_locked = record.locked.checked_sub(report.allocated).ok_or(
            ControllerError::SettlementExceedsAllocation {
                allocated: record.locked,
                used: report.allocated,
            },
        )?;
        let consumed = record
            .consumed_remotely
            .checked_add(report.used_on_remote)
            .ok_or(ControllerError::AmountOverflow)?;
        let mut phase = record.phase;
        if remaining_locked == 0 {
            phase.advance(AllocationPhase::Unlocked)?;
        }

        let unlocked = ledger.settle(
            report.owner,
            report.source_token,
            report.allocated,
            report.used_on_remote,
        )?;

        if let Some(record) = self.outbound.get_mut(&key) {
            record.locked = remaining_locked;
            record.consumed_remotely = consumed;
            record.phase = phase;
        }
        Ok(unlocked)
    }

    // ─── destination ───────────────────────────────────────────────────────────

    /// Credit an incoming allocation in the ledger and open its record.
    pub fn open_allocation(
        &mut self,
        ledger: &mut GasLedger,
        owner: Address,
        token: Address,
        origin: ChainId,
        origin_controller: Address,
        source_token: Address,
        amount: Amount,
    ) -> Result<()> {
        let key = (owner, token, origin, source_token);
        let mut record = self.inbound.get(&key).cloned().unwrap_or(InboundAllocation {
            phase: AllocationPhase::Pending,
            origin_controller,
            allocated: 0,
            used: 0,
        });
        record.phase.advance(AllocationPhase::Pending)?;
        record.origin_controller = origin_controller;
        record.allocated = record
            .allocated
            .checked_add(amount)
            .ok_or(ControllerError::AmountOverflow)?;

        ledger.credit(owner, token, amount)?;
        self.inbound.insert(key, record);
        Ok(())
    }

    /// Charge `fee` against an open allocation, earmarking `relayer_fee`.
    #[allow(clippy::too_many_arguments)]
    pub fn charge_allocation(
        &mut self,
        ledger: &mut GasLedger,
        owner: Address,
        token: Address,
        origin: ChainId,
        source_token: Address,
        fee: Amount,
        relayer: Address,
        relayer_fee: Amount,
    ) -> Result<()> {
        let key = (owner, token, origin, source_token);
        let mut record = self
            .inbound
            .get(&key)
            .cloned()
            .ok_or(ControllerError::NoPendingAllocation {
                owner,
                token,
                origin_chain_id: origin,
            })?;
        let used = record.used.checked_add(fee).ok_or(ControllerError::AmountOverflow)?;
        if used > record.allocated {
            return Err(ControllerError::InsufficientGasBalance {
                available: record.allocated - record.used,
                requested: fee,
            });
        }
        record.phase.advance(AllocationPhase::Executed)?;
        record.used = used;

        ledger.charge(owner, token, fee, relayer, relayer_fee)?;
        self.inbound.insert(key, record);
        Ok(())
    }

    /// Settlements closing every open allocation `origin` sent for
    /// (owner, token), checked against the ledger but not applied. Each one
    /// is applied with [`SettlementCoordinator::complete`] once its report
    /// has been handed to the messenger.
    pub fn plan(
        &self,
        ledger: &GasLedger,
        owner: Address,
        token: Address,
        origin: ChainId,
        origin_controller: Address,
    ) -> Result<Vec<PreparedSettlement>> {
        let mut open: Vec<(&InboundKey, &InboundAllocation)> = self
            .inbound
            .iter()
            .filter(|((o, t, chain, _), record)| {
                *o == owner
                    && *t == token
                    && *chain == origin
                    && record.phase != AllocationPhase::SettlementInitiated
            })
            .collect();
        open.sort_by_key(|(key, _)| **key);

        if open.is_empty() {
            return Err(ControllerError::NoPendingAllocation {
                owner,
                token,
                origin_chain_id: origin,
            });
        }

        let mut scratch = ledger.account(&owner, &token);
        let mut prepared = Vec::with_capacity(open.len());
        for ((_, _, _, source_token), record) in open {
            if record.origin_controller != origin_controller {
                return Err(ControllerError::UntrustedSource {
                    chain_id: origin,
                    controller: origin_controller,
                });
            }
            if !record.phase.can_transition_to(AllocationPhase::SettlementInitiated) {
                return Err(ControllerError::InvalidPhaseTransition {
                    from: record.phase,
                    to: AllocationPhase::SettlementInitiated,
                });
            }
            let used = scratch.consumed_share(record.allocated, record.used);
            scratch = scratch.released(record.allocated, used)?;
            prepared.push(PreparedSettlement {
                origin_chain_id: origin,
                origin_controller,
                report: SettlementReport {
                    owner,
                    source_token: *source_token,
                    destination_token: token,
                    allocated: record.allocated,
                    used_on_remote: used,
                },
            });
        }
        Ok(prepared)
    }

    /// Remove a planned allocation from the ledger and close its record.
    pub fn complete(&mut self, ledger: &mut GasLedger, settlement: &PreparedSettlement) -> Result<()> {
        let report = &settlement.report;
        let key = (
            report.owner,
            report.destination_token,
            settlement.origin_chain_id,
            report.source_token,
        );
        let record = self
            .inbound
            .get_mut(&key)
            .ok_or(ControllerError::NoPendingAllocation {
                owner: report.owner,
                token: report.destination_token,
                origin_chain_id: settlement.origin_chain_id,
            })?;
        if record.allocated != report.allocated
            || report.used_on_remote < record.used
            || report.used_on_remote > record.allocated
        {
            return Err(ControllerError::SettlementExceedsAllocation {
                allocated: record.allocated,
                used: report.used_on_remote,
            });
        }
        let mut phase = record.phase;
        phase.advance(AllocationPhase::SettlementInitiated)?;

        ledger.release(report.owner, report.destination_token, report.allocated, report.used_on_remote)?;
        record.phase = phase;
        record.allocated = 0;
        record.used = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: Address = Address([0x01; 20]);
    const TOKEN: Address = Address([0x0a; 20]);
    const RELAYER: Address = Address([0x0e; 20]);
    const ORIGIN: ChainId = 11155111;
    const DEST: ChainId = 420;

    fn origin_controller() -> Address {
        Address::from_label("origin-controller")
    }

    #[test]
    fn test_phase_transitions() {
        use AllocationPhase::*;
        assert!(Locked.can_transition_to(Unlocked));
        assert!(Pending.can_transition_to(Executed));
        assert!(Executed.can_transition_to(SettlementInitiated));
        assert!(!Unlocked.can_transition_to(Executed));
        assert!(!SettlementInitiated.can_transition_to(Executed));
        assert!(!Locked.can_transition_to(Pending));
    }

    #[test]
    fn test_destination_lifecycle() {
        let mut ledger = GasLedger::new();
        let mut coordinator = SettlementCoordinator::new();

        coordinator
            .open_allocation(&mut ledger, OWNER, TOKEN, ORIGIN, origin_controller(), TOKEN, 1000)
            .unwrap();
        assert_eq!(
            coordinator.inbound(&OWNER, &TOKEN, ORIGIN, &TOKEN).unwrap().phase,
            AllocationPhase::Pending
        );

        coordinator
            .charge_allocation(&mut ledger, OWNER, TOKEN, ORIGIN, TOKEN, 100, RELAYER, 100)
            .unwrap();
        let account = ledger.account(&OWNER, &TOKEN);
        assert_eq!((account.total_amount, account.used_amount), (1000, 100));

        let prepared = coordinator
            .plan(&ledger, OWNER, TOKEN, ORIGIN, origin_controller())
            .unwrap();
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].report.allocated, 1000);
        assert_eq!(prepared[0].report.used_on_remote, 100);
        assert_eq!(ledger.account(&OWNER, &TOKEN).total_amount, 1000);

        coordinator.complete(&mut ledger, &prepared[0]).unwrap();
        assert!(ledger.account(&OWNER, &TOKEN).is_empty());
        assert_eq!(
            coordinator.inbound(&OWNER, &TOKEN, ORIGIN, &TOKEN).unwrap().phase,
            AllocationPhase::SettlementInitiated
        );

        // Nothing left to settle
        assert!(matches!(
            coordinator.plan(&ledger, OWNER, TOKEN, ORIGIN, origin_controller()),
            Err(ControllerError::NoPendingAllocation { .. })
        ));
        assert!(coordinator.complete(&mut ledger, &prepared[0]).is_err());
    }

    #[test]
    fn test_plan_reports_local_spend_of_allocation() {
        let mut ledger = GasLedger::new();
        ledger.set_gas_tokens(&[TOKEN], true);
        let mut coordinator = SettlementCoordinator::new();
        coordinator
            .open_allocation(&mut ledger, OWNER, TOKEN, ORIGIN, origin_controller(), TOKEN, 1000)
            .unwrap();
        coordinator
            .charge_allocation(&mut ledger, OWNER, TOKEN, ORIGIN, TOKEN, 100, RELAYER, 100)
            .unwrap();
        // Spent outside the allocation record
        ledger.charge(OWNER, TOKEN, 800, OWNER, 0).unwrap();

        let prepared = coordinator
            .plan(&ledger, OWNER, TOKEN, ORIGIN, origin_controller())
            .unwrap();
        assert_eq!(prepared[0].report.used_on_remote, 900);

        coordinator.complete(&mut ledger, &prepared[0]).unwrap();
        assert!(ledger.account(&OWNER, &TOKEN).is_empty());
    }

    #[test]
    fn test_initiate_checks_origin_controller() {
        let mut ledger = GasLedger::new();
        let mut coordinator = SettlementCoordinator::new();
        coordinator
            .open_allocation(&mut ledger, OWNER, TOKEN, ORIGIN, origin_controller(), TOKEN, 10)
            .unwrap();

        let err = coordinator
            .plan(&ledger, OWNER, TOKEN, ORIGIN, Address::from_label("impostor"))
            .unwrap_err();
        assert!(matches!(err, ControllerError::UntrustedSource { .. }));
        assert_eq!(ledger.account(&OWNER, &TOKEN).total_amount, 10);
    }

    #[test]
    fn test_charge_cannot_exceed_allocation() {
        let mut ledger = GasLedger::new();
        let mut coordinator = SettlementCoordinator::new();
        coordinator
            .open_allocation(&mut ledger, OWNER, TOKEN, ORIGIN, origin_controller(), TOKEN, 10)
            .unwrap();

        assert!(coordinator
            .charge_allocation(&mut ledger, OWNER, TOKEN, ORIGIN, TOKEN, 11, RELAYER, 11)
            .is_err());
        assert_eq!(ledger.account(&OWNER, &TOKEN).used_amount, 0);
    }

    #[test]
    fn test_origin_lifecycle() {
        let mut ledger = GasLedger::new();
        ledger.set_gas_tokens(&[TOKEN], true);
        ledger.fund(OWNER, TOKEN, 5000).unwrap();
        ledger.lock(OWNER, TOKEN, 1000).unwrap();

        let mut coordinator = SettlementCoordinator::new();
        coordinator.record_lock(OWNER, TOKEN, DEST, 1000).unwrap();

        let report = SettlementReport {
            owner: OWNER,
            source_token: TOKEN,
            destination_token: TOKEN,
            allocated: 1000,
            used_on_remote: 100,
        };
        let unlocked = coordinator.apply_settlement(&mut ledger, DEST, &report).unwrap();
        assert_eq!(unlocked, 900);
        assert_eq!(ledger.account(&OWNER, &TOKEN).locked_amount, 100);

        let record = coordinator.outbound(&OWNER, &TOKEN, DEST).unwrap();
        assert_eq!(record.phase, AllocationPhase::Unlocked);
        assert_eq!(record.locked, 0);
        assert_eq!(record.consumed_remotely, 100);

        // Replaying the same report finds nothing locked for it
        assert!(coordinator.apply_settlement(&mut ledger, DEST, &report).is_err());
        assert_eq!(ledger.account(&OWNER, &TOKEN).locked_amount, 100);
    }

    #[test]
    fn test_settlement_without_lock_rejected() {
        let mut ledger = GasLedger::new();
        let mut coordinator = SettlementCoordinator::new();
        let report = SettlementReport {
            owner: OWNER,
            source_token: TOKEN,
            destination_token: TOKEN,
            allocated: 1,
            used_on_remote: 0,
        };
        assert!(matches!(
            coordinator.apply_settlement(&mut ledger, DEST, &report),
            Err(ControllerError::NoPendingAllocation { .. })
        ));
    }
}
