//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One logical writer task serializes every balance and recharge-code mutation
//! - Each mutation commits one atomic `WriteBatch`
//! - Async message passing with backpressure (bounded mailbox)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Ledger / RechargeCodeIssuer (many callers)     │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ LedgerHandle (Clone)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │          mpsc::channel (bounded mailbox)              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (single task)                │
//! │   read account/code → check → stage entry + rows     │
//! │                       │                               │
//! │                       ▼                               │
//! │         Storage::transaction (atomic batch)           │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! Because Redeem and Void for the same code are both handled here, the
//! status compare-and-set has exactly one winner.

use crate::storage::{composite_key, Table, Transaction};
use crate::types::{
    Account, AccountId, AccountType, Actor, Cents, CodeStatus, EntryReason, LedgerEntry,
    RechargeCode,
};
use crate::{Error, Metrics, Result, Storage};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// A balance mutation request
#[derive(Debug, Clone)]
pub struct Mutation {
    /// Target account
    pub account_id: AccountId,
    /// Signed delta (validated non-zero by the caller)
    pub delta_cents: Cents,
    /// Reason
    pub reason: EntryReason,
    /// External reference
    pub ref_id: String,
    /// Who asked
    pub actor: Actor,
}

/// Committed balance mutation
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// Account before the entry
    pub before: Account,
    /// Account after the entry
    pub after: Account,
    /// Appended entry
    pub entry: LedgerEntry,
}

/// Committed redemption
#[derive(Debug, Clone)]
pub struct RedeemOutcome {
    /// Code before redemption
    pub code_before: RechargeCode,
    /// Code after redemption
    pub code_after: RechargeCode,
    /// Deposit performed in the same batch
    pub deposit: MutationOutcome,
}

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Create a zero-balance account
    OpenAccount {
        account_id: AccountId,
        account_type: AccountType,
        response: oneshot::Sender<Result<Account>>,
    },

    /// Append a deposit or debit
    Apply {
        mutation: Mutation,
        response: oneshot::Sender<Result<MutationOutcome>>,
    },

    /// Persist a freshly generated recharge code (fails on token collision)
    InsertCode {
        code: RechargeCode,
        response: oneshot::Sender<Result<RechargeCode>>,
    },

    /// Redeem a pending code into a rider account
    RedeemCode {
        code: String,
        rider_id: AccountId,
        actor: Actor,
        response: oneshot::Sender<Result<RedeemOutcome>>,
    },

    /// Void a pending code
    VoidCode {
        code: String,
        reason: String,
        response: oneshot::Sender<Result<(RechargeCode, RechargeCode)>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
#[derive(Debug)]
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Counters
    metrics: Metrics,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            mailbox,
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            if let LedgerMessage::Shutdown = msg {
                tracing::info!("Ledger actor shutting down");
                break;
            }
            self.handle_message(msg);
        }
    }

    /// Handle a single message. Reply send failures mean the caller went away.
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::OpenAccount {
                account_id,
                account_type,
                response,
            } => {
                let result = self.open_account(account_id, account_type);
                let _ = response.send(result);
            }

            LedgerMessage::Apply { mutation, response } => {
                let result = self.apply(mutation);
                let _ = response.send(result);
            }

            LedgerMessage::InsertCode { code, response } => {
                let result = self.insert_code(code);
                let _ = response.send(result);
            }

            LedgerMessage::RedeemCode {
                code,
                rider_id,
                actor,
                response,
            } => {
                let result = self.redeem_code(&code, &rider_id, &actor);
                let _ = response.send(result);
            }

            LedgerMessage::VoidCode {
                code,
                reason,
                response,
            } => {
                let result = self.void_code(&code, reason);
                let _ = response.send(result);
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    fn open_account(&self, account_id: AccountId, account_type: AccountType) -> Result<Account> {
        let account = self.storage.transaction(|txn| {
            let key = account_id.as_str().as_bytes();
            if txn.exists(Table::Accounts, key)? {
                return Err(Error::Conflict(format!("Account {} already exists", account_id)));
            }

            let now = Utc::now();
            let account = Account {
                id: account_id.clone(),
                account_type,
                balance_cents: 0,
                entry_count: 0,
                created_at: now,
                updated_at: now,
            };
            txn.put(Table::Accounts, key, &account)?;
            Ok(account)
        })?;

        self.metrics.accounts.inc();
        tracing::info!(account_id = %account.id, account_type = %account.account_type, "Account opened");
        Ok(account)
    }

    fn apply(&self, mutation: Mutation) -> Result<MutationOutcome> {
        let result = self.storage.transaction(|txn| {
            let account: Account = txn
                .get(Table::Accounts, mutation.account_id.as_str().as_bytes())?
                .ok_or_else(|| Error::AccountNotFound(mutation.account_id.clone()))?;

            stage_entry(
                txn,
                &account,
                mutation.delta_cents,
                mutation.reason,
                &mutation.ref_id,
                &mutation.actor,
            )
        });

        match &result {
            Ok(outcome) if outcome.entry.delta_cents > 0 => self.metrics.deposits_total.inc(),
            Ok(_) => self.metrics.debits_total.inc(),
            Err(Error::InsufficientBalance { .. }) => {
                self.metrics.insufficient_balance_total.inc()
            }
            Err(_) => {}
        }

        result
    }

    fn insert_code(&self, code: RechargeCode) -> Result<RechargeCode> {
        let code = self.storage.transaction(|txn| {
            let key = code.code.as_bytes();
            if txn.exists(Table::RechargeCodes, key)? {
                return Err(Error::Conflict(format!("Recharge code {} already exists", code.code)));
            }
            txn.put(Table::RechargeCodes, key, &code)?;
            txn.put_index(&pending_index_key(&code.code))?;
            Ok(code)
        })?;

        self.metrics.codes_issued_total.inc();
        Ok(code)
    }

    fn redeem_code(
        &self,
        code: &str,
        rider_id: &AccountId,
        actor: &Actor,
    ) -> Result<RedeemOutcome> {
        let outcome = self.storage.transaction(|txn| {
            let code_before: RechargeCode = txn
                .get(Table::RechargeCodes, code.as_bytes())?
                .ok_or_else(|| Error::CodeNotFound(code.to_string()))?;

            match code_before.status {
                CodeStatus::Pending => {}
                CodeStatus::Redeemed => {
                    return Err(Error::Conflict(format!("Recharge code {} already redeemed", code)))
                }
                CodeStatus::Voided => {
                    return Err(Error::Conflict(format!("Recharge code {} was voided", code)))
                }
            }

            if let Some(intended) = &code_before.intended_rider_id {
                if intended != rider_id {
                    return Err(Error::Forbidden(format!(
                        "Recharge code {} is reserved for another rider",
                        code
                    )));
                }
            }

            let account: Account = txn
                .get(Table::Accounts, rider_id.as_str().as_bytes())?
                .ok_or_else(|| Error::AccountNotFound(rider_id.clone()))?;

            if account.account_type != AccountType::Rider {
                return Err(Error::Validation(format!(
                    "Account {} is not a rider account",
                    rider_id
                )));
            }

            let deposit = stage_entry(
                txn,
                &account,
                code_before.amount_cents,
                EntryReason::Recharge,
                code,
                actor,
            )?;

            let mut code_after = code_before.clone();
            code_after.status = CodeStatus::Redeemed;
            code_after.redeemed_by = Some(rider_id.clone());
            code_after.redeemed_at = Some(deposit.entry.created_at);
            txn.put(Table::RechargeCodes, code.as_bytes(), &code_after)?;
            txn.delete_index(&pending_index_key(code))?;

            Ok(RedeemOutcome {
                code_before,
                code_after,
                deposit,
            })
        })?;

        self.metrics.codes_redeemed_total.inc();
        self.metrics.deposits_total.inc();
        Ok(outcome)
    }

    fn void_code(&self, code: &str, reason: String) -> Result<(RechargeCode, RechargeCode)> {
        let pair = self.storage.transaction(|txn| {
            let before: RechargeCode = txn
                .get(Table::RechargeCodes, code.as_bytes())?
                .ok_or_else(|| Error::CodeNotFound(code.to_string()))?;

            if before.status != CodeStatus::Pending {
                return Err(Error::Conflict(format!(
                    "Recharge code {} is {:?}, only pending codes can be voided",
                    code, before.status
                )));
            }

            let mut after = before.clone();
            after.status = CodeStatus::Voided;
            after.voided_at = Some(Utc::now());
            after.void_reason = Some(reason);
            txn.put(Table::RechargeCodes, code.as_bytes(), &after)?;
            txn.delete_index(&pending_index_key(code))?;
            Ok((before, after))
        })?;

        self.metrics.codes_voided_total.inc();
        Ok(pair)
    }
}

/// Index of codes still pending (`pending_code|<token>`)
pub(crate) fn pending_index_key(code: &str) -> Vec<u8> {
    composite_key(&[b"pending_code", code.as_bytes()])
}

/// Key of the n-th entry of an account; big-endian so history scans in order
pub(crate) fn entry_key(account_id: &AccountId, sequence: u64) -> Vec<u8> {
    composite_key(&[account_id.as_str().as_bytes(), &sequence.to_be_bytes()])
}

/// Prefix of every entry of an account
pub(crate) fn entry_prefix(account_id: &AccountId) -> Vec<u8> {
    let mut prefix = account_id.as_str().as_bytes().to_vec();
    prefix.push(b'|');
    prefix
}

/// Stage one entry plus the updated account row
fn stage_entry(
    txn: &mut Transaction<'_>,
    account: &Account,
    delta_cents: Cents,
    reason: EntryReason,
    ref_id: &str,
    actor: &Actor,
) -> Result<MutationOutcome> {
    let new_balance = account.balance_cents.checked_add(delta_cents).ok_or_else(|| {
        Error::Validation(format!("Balance overflow on account {}", account.id))
    })?;

    if new_balance < 0 {
        return Err(Error::InsufficientBalance {
            account: account.id.clone(),
            balance_cents: account.balance_cents,
            requested_cents: -delta_cents,
        });
    }

    let now = Utc::now();
    let sequence = account.entry_count + 1;
    let entry = LedgerEntry {
        id: Uuid::now_v7(),
        account_id: account.id.clone(),
        delta_cents,
        balance_after_cents: new_balance,
        reason,
        ref_id: ref_id.to_string(),
        actor_id: actor.id.clone(),
        sequence,
        created_at: now,
    };

    let mut after = account.clone();
    after.balance_cents = new_balance;
    after.entry_count = sequence;
    after.updated_at = now;

    txn.put(Table::Entries, &entry_key(&account.id, sequence), &entry)?;
    txn.put(Table::Accounts, account.id.as_str().as_bytes(), &after)?;

    tracing::debug!(
        account_id = %account.id,
        delta_cents,
        balance_after_cents = new_balance,
        "Entry staged"
    );

    Ok(MutationOutcome {
        before: account.clone(),
        after,
        entry,
    })
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Open an account
    pub async fn open_account(
        &self,
        account_id: AccountId,
        account_type: AccountType,
    ) -> Result<Account> {
        self.request(|response| LedgerMessage::OpenAccount {
            account_id,
            account_type,
            response,
        })
        .await
    }

    /// Apply a deposit or debit
    pub async fn apply(&self, mutation: Mutation) -> Result<MutationOutcome> {
        self.request(|response| LedgerMessage::Apply { mutation, response })
            .await
    }

    /// Persist a new recharge code
    pub async fn insert_code(&self, code: RechargeCode) -> Result<RechargeCode> {
        self.request(|response| LedgerMessage::InsertCode { code, response })
            .await
    }

    /// Redeem a recharge code
    pub async fn redeem_code(
        &self,
        code: String,
        rider_id: AccountId,
        actor: Actor,
    ) -> Result<RedeemOutcome> {
        self.request(|response| LedgerMessage::RedeemCode {
            code,
            rider_id,
            actor,
            response,
        })
        .await
    }

    /// Void a recharge code
    pub async fn void_code(
        &self,
        code: String,
        reason: String,
    ) -> Result<(RechargeCode, RechargeCode)> {
        self.request(|response| LedgerMessage::VoidCode {
            code,
            reason,
            response,
        })
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    storage: Arc<Storage>,
    metrics: Metrics,
    mailbox_capacity: usize,
) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
    let actor = LedgerActor::new(storage, rx, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}
