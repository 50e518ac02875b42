//! Recharge codes: single-use vouchers that top up rider credit
//!
//! Tokens are 12 random symbols from the Crockford base-32 alphabet plus one
//! Luhn mod 32 check symbol, printed as `XXXX-XXXX-XXXX-C`. Input is accepted
//! case-insensitively, with or without separators, and with the usual
//! look-alike substitutions (`O` → `0`, `I`/`L` → `1`).
//!
//! Redeem and Void are both executed by the ledger actor, so the status change
//! out of `Pending` has exactly one winner.

use crate::{
    actor::{pending_index_key, LedgerHandle, RedeemOutcome},
    audit::{AuditEvent, AuditTrail, EntityRef},
    config::RechargeConfig,
    storage::Table,
    types::{Account, AccountId, AccountType, Actor, ActorRole, Cents, CodeStatus, RechargeCode},
    Error, Result, Storage,
};
use chrono::Utc;
use rand::{rngs::OsRng, Rng};
use std::sync::Arc;

/// Crockford base-32 symbols (no I, L, O, U)
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Random symbols per token
const PAYLOAD_LEN: usize = 12;

/// Issues, redeems and voids recharge codes
#[derive(Clone)]
pub struct RechargeCodeIssuer {
    handle: LedgerHandle,
    storage: Arc<Storage>,
    audit: Arc<dyn AuditTrail>,
    config: RechargeConfig,
}

impl std::fmt::Debug for RechargeCodeIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RechargeCodeIssuer")
            .field("config", &self.config)
            .finish()
    }
}

impl RechargeCodeIssuer {
    pub(crate) fn new(
        handle: LedgerHandle,
        storage: Arc<Storage>,
        audit: Arc<dyn AuditTrail>,
        config: RechargeConfig,
    ) -> Self {
        Self {
            handle,
            storage,
            audit,
            config,
        }
    }

    /// Issue a pending code worth `amount_cents`
    pub async fn issue(
        &self,
        amount_cents: Cents,
        intended_rider_id: Option<AccountId>,
        notes: &str,
        actor: &Actor,
    ) -> Result<RechargeCode> {
        require_staff(actor, "issue recharge codes")?;

        if amount_cents < self.config.min_amount_cents || amount_cents > self.config.max_amount_cents
        {
            return Err(Error::Validation(format!(
                "Recharge amount {} outside [{}, {}]",
                amount_cents, self.config.min_amount_cents, self.config.max_amount_cents
            )));
        }

        if let Some(rider_id) = &intended_rider_id {
            let account: Account = self
                .storage
                .get(Table::Accounts, rider_id.as_str().as_bytes())?
                .ok_or_else(|| Error::AccountNotFound(rider_id.clone()))?;
            if account.account_type != AccountType::Rider {
                return Err(Error::Validation(format!(
                    "Account {} is not a rider account",
                    rider_id
                )));
            }
        }

        for attempt in 1..=self.config.max_token_attempts {
            let code = RechargeCode {
                code: generate_token(),
                amount_cents,
                status: CodeStatus::Pending,
                intended_rider_id: intended_rider_id.clone(),
                created_by: actor.id.clone(),
                redeemed_by: None,
                redeemed_at: None,
                voided_at: None,
                void_reason: None,
                notes: notes.trim().to_string(),
                created_at: Utc::now(),
            };

            match self.handle.insert_code(code).await {
                Ok(code) => {
                    tracing::info!(code = %code.code, amount_cents, issued_by = %actor.id, "Recharge code issued");
                    self.audit.emit(AuditEvent::new::<RechargeCode, _>(
                        "recharge.issued",
                        actor,
                        EntityRef::new("recharge_code", code.code.as_str()),
                        None,
                        &code,
                    ));
                    return Ok(code);
                }
                Err(Error::Conflict(_)) => {
                    tracing::warn!(attempt, "Recharge token collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Conflict(format!(
            "No unused recharge token after {} attempts",
            self.config.max_token_attempts
        )))
    }

    /// Redeem a code into `rider_id`'s account. Returns the new balance.
    pub async fn redeem(&self, input: &str, rider_id: &AccountId, actor: &Actor) -> Result<Cents> {
        let code = normalize_token(input)?;

        match actor.role {
            ActorRole::Rider if !actor.is_rider(rider_id) => {
                return Err(Error::Forbidden(
                    "Riders can only redeem into their own account".to_string(),
                ))
            }
            ActorRole::Restaurant => {
                return Err(Error::Forbidden(
                    "Restaurants cannot redeem recharge codes".to_string(),
                ))
            }
            _ => {}
        }

        let outcome = self
            .handle
            .redeem_code(code.clone(), rider_id.clone(), actor.clone())
            .await;

        let RedeemOutcome {
            code_before,
            code_after,
            deposit,
        } = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(code = %code, rider_id = %rider_id, error = %e, "Recharge redemption rejected");
                return Err(e);
            }
        };

        tracing::info!(
            code = %code,
            rider_id = %rider_id,
            amount_cents = code_after.amount_cents,
            balance_after_cents = deposit.after.balance_cents,
            "Recharge code redeemed"
        );

        self.audit.emit(AuditEvent::new(
            "recharge.redeemed",
            actor,
            EntityRef::new("recharge_code", code.as_str()),
            Some(&code_before),
            &serde_json::json!({ "code": code_after, "account": deposit.after, "entry": deposit.entry }),
        ));

        Ok(deposit.after.balance_cents)
    }

    /// Void a pending code
    pub async fn void(&self, input: &str, reason: &str, actor: &Actor) -> Result<()> {
        require_staff(actor, "void recharge codes")?;
        let code = normalize_token(input)?;

        if reason.trim().is_empty() {
            return Err(Error::Validation("Void reason is required".to_string()));
        }

        let (before, after) = self
            .handle
            .void_code(code.clone(), reason.trim().to_string())
            .await?;

        tracing::info!(code = %code, voided_by = %actor.id, "Recharge code voided");
        self.audit.emit(AuditEvent::new(
            "recharge.voided",
            actor,
            EntityRef::new("recharge_code", code.as_str()),
            Some(&before),
            &after,
        ));

        Ok(())
    }

    /// Look up a code by any accepted spelling
    pub fn get(&self, input: &str) -> Result<RechargeCode> {
        let code = normalize_token(input)?;
        self.storage
            .get(Table::RechargeCodes, code.as_bytes())?
            .ok_or(Error::CodeNotFound(code))
    }

    /// Codes not yet redeemed or voided, oldest first
    pub fn list_pending(&self) -> Result<Vec<RechargeCode>> {
        let prefix = pending_index_key("");
        let mut codes = Vec::new();
        for key in self.storage.scan_prefix_keys(Table::Indices, &prefix)? {
            let token = &key[prefix.len()..];
            if let Some(code) = self.storage.get::<RechargeCode>(Table::RechargeCodes, token)? {
                codes.push(code);
            }
        }
        codes.sort_by_key(|c| c.created_at);
        Ok(codes)
    }
}

fn require_staff(actor: &Actor, action: &str) -> Result<()> {
    match actor.role {
        ActorRole::Admin | ActorRole::Agent => Ok(()),
        _ => Err(Error::Forbidden(format!(
            "{} ({:?}) may not {}",
            actor.id, actor.role, action
        ))),
    }
}

/// Generate a fresh canonical token
pub fn generate_token() -> String {
    let mut rng = OsRng;
    let payload: Vec<u8> = (0..PAYLOAD_LEN)
        .map(|_| rng.gen_range(0..ALPHABET.len() as u8))
        .collect();
    format_token(&payload, check_symbol(&payload))
}

/// Parse user input into the canonical token, verifying the check symbol
pub fn normalize_token(input: &str) -> Result<String> {
    let mut values = Vec::with_capacity(PAYLOAD_LEN + 1);
    for c in input.chars() {
        if c == '-' || c.is_whitespace() {
            continue;
        }
        let value = symbol_value(c).ok_or_else(|| {
            Error::Validation(format!("Invalid character {:?} in recharge code", c))
        })?;
        values.push(value);
    }

    if values.len() != PAYLOAD_LEN + 1 {
        return Err(Error::Validation(format!(
            "Recharge code must have {} symbols, got {}",
            PAYLOAD_LEN + 1,
            values.len()
        )));
    }

    let (payload, check) = values.split_at(PAYLOAD_LEN);
    if check_symbol(payload) != check[0] {
        return Err(Error::Validation("Recharge code checksum mismatch".to_string()));
    }

    Ok(format_token(payload, check[0]))
}

fn symbol_value(c: char) -> Option<u8> {
    let c = match c.to_ascii_uppercase() {
        'O' => '0',
        'I' | 'L' => '1',
        other => other,
    };
    ALPHABET.iter().position(|&s| s as char == c).map(|p| p as u8)
}

/// Luhn mod 32 over the payload values
fn check_symbol(payload: &[u8]) -> u8 {
    let n = ALPHABET.len() as u32;
    let mut factor = 2;
    let mut sum = 0u32;
    for &value in payload.iter().rev() {
        let addend = factor * value as u32;
        sum += addend / n + addend % n;
        factor = if factor == 2 { 1 } else { 2 };
    }
    ((n - sum % n) % n) as u8
}

fn format_token(payload: &[u8], check: u8) -> String {
    let mut token = String::with_capacity(PAYLOAD_LEN + 4);
    for (i, &value) in payload.iter().enumerate() {
        if i > 0 && i % 4 == 0 {
            token.push('-');
        }
        token.push(ALPHABET[value as usize] as char);
    }
    token.push('-');
    token.push(ALPHABET[check as usize] as char);
    token
}
