//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account rows (key: account_id)
//! - `entries` - Append-only ledger entries (key: account_id || '|' || sequence)
//! - `indices` - Secondary indices with empty values (uniqueness and lookups)
//! - `recharge_codes` - Recharge vouchers (key: canonical token)
//! - `settlements` - Settlement records (key: settlement_id)
//! - `daily_reports` - Rider daily reports (key: rider_id || '|' || date)
//!
//! Every write goes through [`Storage::transaction`], which holds the write
//! section while the closure checks state and stages a `WriteBatch`, then
//! commits the batch atomically. Reads inside a transaction observe committed
//! state only.

use crate::{
    error::{Error, Result},
    Config,
};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Logical tables, one column family each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    /// Account rows
    Accounts,
    /// Ledger entries
    Entries,
    /// Secondary indices
    Indices,
    /// Recharge codes
    RechargeCodes,
    /// Settlements
    Settlements,
    /// Daily reports
    DailyReports,
}

impl Table {
    const ALL: [Table; 6] = [
        Table::Accounts,
        Table::Entries,
        Table::Indices,
        Table::RechargeCodes,
        Table::Settlements,
        Table::DailyReports,
    ];

    /// Column family name
    pub fn cf_name(&self) -> &'static str {
        match self {
            Table::Accounts => "accounts",
            Table::Entries => "entries",
            Table::Indices => "indices",
            Table::RechargeCodes => "recharge_codes",
            Table::Settlements => "settlements",
            Table::DailyReports => "daily_reports",
        }
    }

    fn cf_options(&self) -> Options {
        let mut opts = Options::default();
        match self {
            // Append-only history, read rarely
            Table::Entries => {
                opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
            }
            Table::Indices => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                let mut block_opts = rocksdb::BlockBasedOptions::default();
                block_opts.set_bloom_filter(10.0, false);
                opts.set_block_based_table_factory(&block_opts);
            }
            _ => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            }
        }
        opts
    }
}

/// Build a composite key from parts joined by `|`
pub fn composite_key(parts: &[&[u8]]) -> Vec<u8> {
    let mut key = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(b'|');
        }
        key.extend_from_slice(part);
    }
    key
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    write_section: Mutex<()>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.db.path()).finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors: Vec<_> = Table::ALL
            .iter()
            .map(|t| ColumnFamilyDescriptor::new(t.cf_name(), t.cf_options()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            "Opened RocksDB at {:?} with {} column families",
            path,
            Table::ALL.len()
        );

        Ok(Self {
            db: Arc::new(db),
            write_section: Mutex::new(()),
        })
    }

    fn cf_handle(&self, table: Table) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(table.cf_name())
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", table.cf_name())))
    }

    // Reads

    /// Get a row by key
    pub fn get<T: DeserializeOwned>(&self, table: Table, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(table)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a key exists
    pub fn exists(&self, table: Table, key: &[u8]) -> Result<bool> {
        let cf = self.cf_handle(table)?;
        Ok(self.db.get_pinned_cf(cf, key)?.is_some())
    }

    /// Keys starting with `prefix`, in key order
    pub fn scan_prefix_keys(&self, table: Table, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        self.for_each_prefixed(table, prefix, |key, _| {
            keys.push(key.to_vec());
            Ok(())
        })?;
        Ok(keys)
    }

    /// Rows whose key starts with `prefix`, in key order
    pub fn scan_prefix<T: DeserializeOwned>(&self, table: Table, prefix: &[u8]) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        self.for_each_prefixed(table, prefix, |_, value| {
            rows.push(bincode::deserialize(value)?);
            Ok(())
        })?;
        Ok(rows)
    }

    /// Every row of a table, in key order
    pub fn scan_all<T: DeserializeOwned>(&self, table: Table) -> Result<Vec<T>> {
        self.scan_prefix(table, &[])
    }

    fn for_each_prefixed<F>(&self, table: Table, prefix: &[u8], f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let cf = self.cf_handle(table)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        walk_prefixed(iter, prefix, f)
    }

    /// Point-in-time read view
    ///
    /// Every read through the view sees the same committed state, so rows
    /// written by one batch are observed all together or not at all.
    pub fn snapshot(&self) -> ReadSnapshot<'_> {
        ReadSnapshot {
            storage: self,
            snapshot: self.db.snapshot(),
        }
    }

    // Writes

    /// Run a check-then-write section and commit its batch atomically
    ///
    /// The closure runs while the write section is held, so no other
    /// transaction can commit between its reads and its batch. If the closure
    /// fails nothing is written.
    pub fn transaction<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        E: From<Error>,
        F: FnOnce(&mut Transaction<'_>) -> std::result::Result<R, E>,
    {
        let _guard = self.write_section.lock();

        let mut txn = Transaction {
            storage: self,
            batch: WriteBatch::default(),
            staged: 0,
        };

        let result = f(&mut txn)?;

        if txn.staged > 0 {
            let staged = txn.staged;
            self.db.write(txn.batch).map_err(Error::from)?;
            tracing::debug!(staged, "Transaction committed");
        }

        Ok(result)
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            accounts: self.approximate_count(Table::Accounts)?,
            entries: self.approximate_count(Table::Entries)?,
            recharge_codes: self.approximate_count(Table::RechargeCodes)?,
            settlements: self.approximate_count(Table::Settlements)?,
            daily_reports: self.approximate_count(Table::DailyReports)?,
        })
    }

    fn approximate_count(&self, table: Table) -> Result<u64> {
        let cf = self.cf_handle(table)?;
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }
}

fn walk_prefixed<I, F>(iter: I, prefix: &[u8], mut f: F) -> Result<()>
where
    I: Iterator<Item = std::result::Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
    F: FnMut(&[u8], &[u8]) -> Result<()>,
{
    for item in iter {
        let (key, value) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        f(&key, &value)?;
    }
    Ok(())
}

/// Consistent reads from one RocksDB snapshot, see [`Storage::snapshot`]
pub struct ReadSnapshot<'a> {
    storage: &'a Storage,
    snapshot: rocksdb::Snapshot<'a>,
}

impl std::fmt::Debug for ReadSnapshot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadSnapshot").finish_non_exhaustive()
    }
}

impl ReadSnapshot<'_> {
    /// Row as of the snapshot
    pub fn get<T: DeserializeOwned>(&self, table: Table, key: &[u8]) -> Result<Option<T>> {
        let cf = self.storage.cf_handle(table)?;
        match self.snapshot.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Rows with prefix as of the snapshot, in key order
    pub fn scan_prefix<T: DeserializeOwned>(&self, table: Table, prefix: &[u8]) -> Result<Vec<T>> {
        let cf = self.storage.cf_handle(table)?;
        let iter = self
            .snapshot
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut rows = Vec::new();
        walk_prefixed(iter, prefix, |_, value| {
            rows.push(bincode::deserialize(value)?);
            Ok(())
        })?;
        Ok(rows)
    }

    /// Every row of a table as of the snapshot
    pub fn scan_all<T: DeserializeOwned>(&self, table: Table) -> Result<Vec<T>> {
        self.scan_prefix(table, &[])
    }
}

/// Staged writes inside [`Storage::transaction`]
pub struct Transaction<'a> {
    storage: &'a Storage,
    batch: WriteBatch,
    staged: usize,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").field("staged", &self.staged).finish()
    }
}

impl Transaction<'_> {
    /// Read committed row
    pub fn get<T: DeserializeOwned>(&self, table: Table, key: &[u8]) -> Result<Option<T>> {
        self.storage.get(table, key)
    }

    /// Whether a committed key exists
    pub fn exists(&self, table: Table, key: &[u8]) -> Result<bool> {
        self.storage.exists(table, key)
    }

    /// Committed keys with prefix
    pub fn scan_prefix_keys(&self, table: Table, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.storage.scan_prefix_keys(table, prefix)
    }

    /// Committed rows with prefix
    pub fn scan_prefix<T: DeserializeOwned>(&self, table: Table, prefix: &[u8]) -> Result<Vec<T>> {
        self.storage.scan_prefix(table, prefix)
    }

    /// Stage a row write
    pub fn put<T: Serialize>(&mut self, table: Table, key: &[u8], value: &T) -> Result<()> {
        let cf = self.storage.cf_handle(table)?;
        let bytes = bincode::serialize(value)?;
        self.batch.put_cf(cf, key, bytes);
        self.staged += 1;
        Ok(())
    }

    /// Stage an index key (empty value)
    pub fn put_index(&mut self, key: &[u8]) -> Result<()> {
        let cf = self.storage.cf_handle(Table::Indices)?;
        self.batch.put_cf(cf, key, b"");
        self.staged += 1;
        Ok(())
    }

    /// Stage an index key removal
    pub fn delete_index(&mut self, key: &[u8]) -> Result<()> {
        let cf = self.storage.cf_handle(Table::Indices)?;
        self.batch.delete_cf(cf, key);
        self.staged += 1;
        Ok(())
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate account count
    pub accounts: u64,
    /// Approximate entry count
    pub entries: u64,
    /// Approximate recharge code count
    pub recharge_codes: u64,
    /// Approximate settlement count
    pub settlements: u64,
    /// Approximate daily report count
    pub daily_reports: u64,
}
