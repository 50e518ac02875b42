//! Credit ledger orchestration layer
//!
//! Ties together storage, the single-writer actor, metrics and the audit trail
//! into the account-level API used by the settlement and reconciliation crates.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{AccountId, AccountType, Actor, Config, EntryReason, Ledger, TracingAuditTrail};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let config = Config::default();
//!     let ledger = Ledger::open(config, Arc::new(TracingAuditTrail::new("ledger-core"))).await?;
//!
//!     let rider = AccountId::new("rider-42");
//!     ledger.open_account(rider.clone(), AccountType::Rider, &Actor::system()).await?;
//!     ledger
//!         .deposit(&rider, 5_000, EntryReason::Recharge, "cash-topup-1", &Actor::admin("admin-1"))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{entry_prefix, spawn_ledger_actor, LedgerHandle, Mutation, MutationOutcome},
    audit::{AuditEvent, AuditTrail, EntityRef},
    recharge::RechargeCodeIssuer,
    storage::Table,
    types::{Account, AccountId, AccountType, Actor, Cents, EntryReason, LedgerEntry},
    Config, Error, Metrics, Result, Storage,
};
use std::sync::Arc;

/// Main ledger interface
pub struct Ledger {
    /// Actor handle for mutations
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Audit collaborator
    audit: Arc<dyn AuditTrail>,

    /// Counters
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("storage", &self.storage)
            .field("service", &self.config.service_name)
            .finish()
    }
}

impl Ledger {
    /// Open ledger with configuration. Must be called inside a Tokio runtime.
    pub async fn open(config: Config, audit: Arc<dyn AuditTrail>) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        let open_accounts = storage.scan_prefix_keys(Table::Accounts, &[])?.len();
        metrics.accounts.set(open_accounts as i64);

        let handle = spawn_ledger_actor(storage.clone(), metrics.clone(), config.mailbox_capacity);

        Ok(Self {
            handle,
            storage,
            audit,
            metrics,
            config,
        })
    }

    /// Shared storage, for crates that persist their own tables next to the ledger
    pub fn storage(&self) -> Arc<Storage> {
        self.storage.clone()
    }

    /// Shared audit trail
    pub fn audit(&self) -> Arc<dyn AuditTrail> {
        self.audit.clone()
    }

    /// Metrics of this ledger instance
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Recharge code issuer bound to this ledger
    pub fn recharge_codes(&self) -> RechargeCodeIssuer {
        RechargeCodeIssuer::new(
            self.handle.clone(),
            self.storage.clone(),
            self.audit.clone(),
            self.config.recharge.clone(),
        )
    }

    /// Create a zero-balance account for a newly onboarded rider or restaurant
    pub async fn open_account(
        &self,
        account_id: AccountId,
        account_type: AccountType,
        actor: &Actor,
    ) -> Result<Account> {
        validate_account_id(&account_id)?;

        let account = self.handle.open_account(account_id, account_type).await?;

        self.audit.emit(AuditEvent::new::<Account, _>(
            "ledger.account_opened",
            actor,
            EntityRef::new("account", account.id.as_str()),
            None,
            &account,
        ));

        Ok(account)
    }

    /// Append a positive entry. Returns the new balance.
    pub async fn deposit(
        &self,
        account_id: &AccountId,
        amount_cents: Cents,
        reason: EntryReason,
        ref_id: &str,
        actor: &Actor,
    ) -> Result<Cents> {
        validate_amount(amount_cents)?;
        self.mutate("ledger.deposit", account_id, amount_cents, reason, ref_id, actor)
            .await
    }

    /// Append a negative entry. Fails `InsufficientBalance` rather than go below zero.
    pub async fn debit(
        &self,
        account_id: &AccountId,
        amount_cents: Cents,
        reason: EntryReason,
        ref_id: &str,
        actor: &Actor,
    ) -> Result<Cents> {
        validate_amount(amount_cents)?;
        self.mutate("ledger.debit", account_id, -amount_cents, reason, ref_id, actor)
            .await
    }

    async fn mutate(
        &self,
        event_type: &str,
        account_id: &AccountId,
        delta_cents: Cents,
        reason: EntryReason,
        ref_id: &str,
        actor: &Actor,
    ) -> Result<Cents> {
        let mutation = Mutation {
            account_id: account_id.clone(),
            delta_cents,
            reason,
            ref_id: ref_id.to_string(),
            actor: actor.clone(),
        };

        let MutationOutcome { before, after, entry } = match self.handle.apply(mutation).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(account_id = %account_id, delta_cents, error = %e, "Ledger mutation rejected");
                return Err(e);
            }
        };

        tracing::info!(
            account_id = %account_id,
            delta_cents,
            balance_after_cents = entry.balance_after_cents,
            ref_id,
            "Ledger entry appended"
        );

        self.audit.emit(AuditEvent::new(
            event_type,
            actor,
            EntityRef::new("account", account_id.as_str()),
            Some(&before),
            &serde_json::json!({ "account": after, "entry": entry }),
        ));

        Ok(after.balance_cents)
    }

    /// Current balance
    pub fn get_balance(&self, account_id: &AccountId) -> Result<Cents> {
        Ok(self.get_account(account_id)?.balance_cents)
    }

    /// Account row
    pub fn get_account(&self, account_id: &AccountId) -> Result<Account> {
        self.storage
            .get(Table::Accounts, account_id.as_str().as_bytes())?
            .ok_or_else(|| Error::AccountNotFound(account_id.clone()))
    }

    /// Entries of an account in append order
    pub fn history(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        // Surface NotFound for unknown accounts instead of an empty history
        self.get_account(account_id)?;
        self.storage.scan_prefix(Table::Entries, &entry_prefix(account_id))
    }

    /// Recompute the balance from entries and compare with the cached value
    ///
    /// Account row and entries come from one snapshot, so a mutation
    /// committing concurrently is seen entirely or not at all.
    pub fn verify_balance(&self, account_id: &AccountId) -> Result<Cents> {
        let snapshot = self.storage.snapshot();
        let account: Account = snapshot
            .get(Table::Accounts, account_id.as_str().as_bytes())?
            .ok_or_else(|| Error::AccountNotFound(account_id.clone()))?;
        let entries: Vec<LedgerEntry> =
            snapshot.scan_prefix(Table::Entries, &entry_prefix(account_id))?;
        check_account(&account, &entries)
    }

    /// Verify every account. Returns the number of accounts checked.
    pub fn verify_all_balances(&self) -> Result<usize> {
        let snapshot = self.storage.snapshot();
        let accounts: Vec<Account> = snapshot.scan_all(Table::Accounts)?;
        for account in &accounts {
            let entries: Vec<LedgerEntry> =
                snapshot.scan_prefix(Table::Entries, &entry_prefix(&account.id))?;
            check_account(account, &entries)?;
        }

        tracing::info!(accounts = accounts.len(), "Ledger balances verified");
        Ok(accounts.len())
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}

fn check_account(account: &Account, entries: &[LedgerEntry]) -> Result<Cents> {
    let sum: Cents = entries.iter().map(|e| e.delta_cents).sum();
    let last_sequence = entries.last().map(|e| e.sequence).unwrap_or(0);

    if sum != account.balance_cents || last_sequence != account.entry_count {
        tracing::error!(
            account_id = %account.id,
            cached_cents = account.balance_cents,
            ledger_sum_cents = sum,
            entry_count = account.entry_count,
            last_sequence,
            "Balance invariant violated"
        );
        return Err(Error::InvariantViolation(format!(
            "Account {} balance {} != ledger sum {}",
            account.id, account.balance_cents, sum
        )));
    }

    Ok(sum)
}

fn validate_amount(amount_cents: Cents) -> Result<()> {
    if amount_cents <= 0 {
        return Err(Error::Validation(format!(
            "Amount must be positive, got {}",
            amount_cents
        )));
    }
    Ok(())
}

/// Ids become storage key prefixes, so the separator is not allowed
pub(crate) fn validate_account_id(account_id: &AccountId) -> Result<()> {
    let id = account_id.as_str();
    if id.trim().is_empty() || id.contains('|') {
        return Err(Error::Validation(format!("Invalid account id {:?}", id)));
    }
    Ok(())
}
