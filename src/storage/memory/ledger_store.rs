//! In-memory LedgerStore implementation.

use async_trait::async_trait;
use chrono::Utc;

use super::MemoryStore;
use crate::model::{
    Account, Balance, DeltaOutcome, LedgerDelta, LedgerTxn, MemberId, TxnReason, TxnReference,
};
use crate::storage::{BalanceAdjustment, LedgerStore, Result, TransferOutcome};

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn apply_delta(&self, delta: &LedgerDelta) -> Result<DeltaOutcome> {
        let now = Utc::now();
        self.transact(|state| state.apply_delta(delta, now)).await
    }

    async fn balance(&self, member: &MemberId, account: Account) -> Result<Balance> {
        Ok(self.read(|state| state.balance(member, account)).await)
    }

    async fn transactions(&self, member: &MemberId, account: Account) -> Result<Vec<LedgerTxn>> {
        Ok(self
            .read(|state| {
                state
                    .txns
                    .iter()
                    .filter(|t| &t.member_id == member && t.account == account)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn derived_balance(&self, member: &MemberId, account: Account) -> Result<i64> {
        Ok(self
            .read(|state| {
                state
                    .txns
                    .iter()
                    .filter(|t| &t.member_id == member && t.account == account)
                    .map(|t| t.delta_cents)
                    .sum()
            })
            .await)
    }

    async fn transfer_earnings_to_wallet(
        &self,
        member: &MemberId,
        amount_cents: i64,
        reference: &TxnReference,
    ) -> Result<TransferOutcome> {
        let now = Utc::now();
        self.transact(|state| {
            let debit = LedgerDelta::debit(
                Account::NetworkEarnings,
                member.clone(),
                amount_cents,
                TxnReason::EarningsTransfer,
            )
            .with_reference(reference.clone());
            let credit = LedgerDelta::credit(
                Account::Wallet,
                member.clone(),
                amount_cents,
                TxnReason::EarningsTransfer,
            )
            .with_reference(reference.clone());

            let earnings = state.apply_delta(&debit, now)?;
            let wallet = state.apply_delta(&credit, now)?;
            Ok(TransferOutcome {
                earnings_balance_cents: earnings.balance_cents,
                wallet_balance_cents: wallet.balance_cents,
                applied: earnings.applied,
            })
        })
        .await
    }

    async fn set_balance(
        &self,
        member: &MemberId,
        account: Account,
        target_cents: i64,
        reference: &TxnReference,
    ) -> Result<BalanceAdjustment> {
        let now = Utc::now();
        self.transact(|state| {
            let previous = state.balance(member, account).balance_cents;
            let delta = LedgerDelta::credit(
                account,
                member.clone(),
                target_cents - previous,
                TxnReason::AdminAdjustment,
            )
            .with_reference(reference.clone());
            let outcome = state.apply_delta(&delta, now)?;
            Ok(BalanceAdjustment {
                previous_cents: previous,
                balance_cents: outcome.balance_cents,
                delta_cents: outcome.balance_cents - previous,
            })
        })
        .await
    }
}
