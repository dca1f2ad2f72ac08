//! SQLite persistence for blocks, signed ledger entries and materialized balances.
//!
//! All access goes through one connection. Mutations run inside
//! [`LedgerStore::run_atomically`], which owns the connection for the whole
//! unit, so readers never observe a partially applied block or rollback.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::StoreError;
use crate::model::{EntryKind, Input, LedgerEntry};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    id      TEXT PRIMARY KEY,
    height  INTEGER NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS transactions (
    id        TEXT PRIMARY KEY,
    block_id  TEXT NOT NULL REFERENCES blocks(id) DEFERRABLE INITIALLY DEFERRED,
    position  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS transactions_block ON transactions(block_id);

CREATE TABLE IF NOT EXISTS ledger_entries (
    tx_id            TEXT NOT NULL REFERENCES transactions(id) DEFERRABLE INITIALLY DEFERRED,
    block_id         TEXT NOT NULL REFERENCES blocks(id) DEFERRABLE INITIALLY DEFERRED,
    kind             TEXT NOT NULL CHECK (kind IN ('in', 'out')),
    idx              INTEGER NOT NULL,
    address          TEXT NOT NULL,
    value            INTEGER NOT NULL,
    input_ref_tx_id  TEXT,
    input_ref_index  INTEGER,
    UNIQUE (tx_id, kind, idx)
);
CREATE INDEX IF NOT EXISTS ledger_entries_block ON ledger_entries(block_id);
CREATE INDEX IF NOT EXISTS ledger_entries_spent ON ledger_entries(input_ref_tx_id, input_ref_index);

CREATE TABLE IF NOT EXISTS balances (
    address  TEXT PRIMARY KEY,
    balance  INTEGER NOT NULL DEFAULT 0
);
"#;

/// Ensure that the given directory exists (create recursively if needed).
pub fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Read operations the block validator is allowed to perform.
pub trait LedgerRead {
    /// Height of the highest stored block, 0 when empty.
    fn max_height(&self) -> Result<u64, StoreError>;

    /// Value of output `index` of `tx_id`; `StoreError::NotFound` if absent.
    fn entry_value(&self, tx_id: &str, index: u32) -> Result<i64, StoreError>;

    /// Address owning output `index` of `tx_id`; `StoreError::NotFound` if absent.
    fn entry_address(&self, tx_id: &str, index: u32) -> Result<String, StoreError>;

    /// Whether a transaction other than `spender` already consumed `output`.
    fn is_spent(&self, output: &Input, spender: &str) -> Result<bool, StoreError>;
}

/// Handle to the ledger database.
#[derive(Clone)]
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerStore {
    /// Open or create the database at `path`. Writers from other processes are
    /// waited on for at most `busy_timeout` before the store reports itself unavailable.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        Self::initialize(conn)
    }

    /// Fresh in-memory database, used by tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `unit` inside a single immediate transaction on a blocking thread.
    ///
    /// The transaction commits only if `unit` returns `Ok`; an `Err` or a panic
    /// drops it, which rolls every statement back. Failures to begin, commit or
    /// reach the worker thread are mapped through `on_store_error`.
    pub(crate) async fn run_atomically<T, E, F>(
        &self,
        on_store_error: fn(StoreError) -> E,
        unit: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let joined = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let tx = guard
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| on_store_error(e.into()))?;
            let handle = StoreTx { tx };
            let out = unit(&handle)?;
            handle.tx.commit().map_err(|e| on_store_error(e.into()))?;
            Ok(out)
        })
        .await;

        match joined {
            Ok(res) => res,
            Err(e) => Err(on_store_error(StoreError::Unavailable(format!(
                "store task failed: {e}"
            )))),
        }
    }

    /// Run a read-only closure against a consistent snapshot.
    pub async fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let handle = StoreTx {
                tx: guard.transaction()?,
            };
            // dropped without commit: nothing to keep
            f(&handle)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

/// Operations available inside one store transaction.
pub struct StoreTx<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl StoreTx<'_> {
    pub(crate) fn insert_block(&self, id: &str, height: u64) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO blocks (id, height) VALUES (?1, ?2)",
            params![id, height],
        )?;
        Ok(())
    }

    /// Returns `false` when the transaction id is already recorded.
    pub(crate) fn insert_transaction(
        &self,
        id: &str,
        block_id: &str,
        position: usize,
    ) -> Result<bool, StoreError> {
        let n = self.tx.execute(
            "INSERT INTO transactions (id, block_id, position) VALUES (?1, ?2, ?3)
             ON CONFLICT (id) DO NOTHING",
            params![id, block_id, position],
        )?;
        Ok(n == 1)
    }

    /// Append an entry. Returns `false` if `(tx_id, kind, index)` already exists,
    /// in which case nothing is written.
    pub(crate) fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<bool, StoreError> {
        let (ref_tx, ref_index) = match &entry.input_ref {
            Some(input) => (Some(input.tx_id.as_str()), Some(input.index)),
            None => (None, None),
        };
        let n = self.tx.execute(
            "INSERT INTO ledger_entries
                (tx_id, block_id, kind, idx, address, value, input_ref_tx_id, input_ref_index)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (tx_id, kind, idx) DO NOTHING",
            params![
                entry.tx_id,
                entry.block_id,
                entry.kind.as_str(),
                entry.index,
                entry.address,
                entry.value,
                ref_tx,
                ref_index,
            ],
        )?;
        Ok(n == 1)
    }

    /// Materialized balance, 0 for addresses never seen.
    pub fn get_balance(&self, address: &str) -> Result<i64, StoreError> {
        let balance = self
            .tx
            .query_row(
                "SELECT balance FROM balances WHERE address = ?1",
                params![address],
                |row| row.get(0),
            )
            .optional()?;
        Ok(balance.unwrap_or(0))
    }

    pub(crate) fn upsert_balance_delta(&self, address: &str, delta: i64) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO balances (address, balance) VALUES (?1, ?2)
             ON CONFLICT (address) DO UPDATE SET balance = balances.balance + excluded.balance",
            params![address, delta],
        )?;
        Ok(())
    }

    pub(crate) fn overwrite_balance(&self, address: &str, total: i64) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO balances (address, balance) VALUES (?1, ?2)
             ON CONFLICT (address) DO UPDATE SET balance = excluded.balance",
            params![address, total],
        )?;
        Ok(())
    }

    pub(crate) fn delete_entries_above_height(&self, height: u64) -> Result<usize, StoreError> {
        Ok(self.tx.execute(
            "DELETE FROM ledger_entries
             WHERE block_id IN (SELECT id FROM blocks WHERE height > ?1)",
            params![height],
        )?)
    }

    pub(crate) fn delete_transactions_above_height(&self, height: u64) -> Result<usize, StoreError> {
        Ok(self.tx.execute(
            "DELETE FROM transactions
             WHERE block_id IN (SELECT id FROM blocks WHERE height > ?1)",
            params![height],
        )?)
    }

    pub(crate) fn delete_blocks_above_height(&self, height: u64) -> Result<usize, StoreError> {
        Ok(self
            .tx
            .execute("DELETE FROM blocks WHERE height > ?1", params![height])?)
    }

    /// Every materialized balance row, ordered by address.
    pub fn balance_rows(&self) -> Result<BTreeMap<String, i64>, StoreError> {
        let mut stmt = self.tx.prepare("SELECT address, balance FROM balances")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// Sum of signed entries per address over blocks at or below `height`.
    pub fn entry_totals_up_to(&self, height: u64) -> Result<BTreeMap<String, i64>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT e.address, SUM(e.value)
             FROM ledger_entries e JOIN blocks b ON b.id = e.block_id
             WHERE b.height <= ?1
             GROUP BY e.address",
        )?;
        let rows = stmt
            .query_map(params![height], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    }

    fn output_entry<T: rusqlite::types::FromSql>(
        &self,
        column: &str,
        tx_id: &str,
        index: u32,
    ) -> Result<T, StoreError> {
        self.tx
            .query_row(
                &format!(
                    "SELECT {column} FROM ledger_entries
                     WHERE tx_id = ?1 AND kind = ?2 AND idx = ?3"
                ),
                params![tx_id, EntryKind::Output.as_str(), index],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                tx_id: tx_id.to_owned(),
                index,
            })
    }
}

impl LedgerRead for StoreTx<'_> {
    fn max_height(&self) -> Result<u64, StoreError> {
        Ok(self
            .tx
            .query_row("SELECT COALESCE(MAX(height), 0) FROM blocks", [], |row| {
                row.get(0)
            })?)
    }

    fn entry_value(&self, tx_id: &str, index: u32) -> Result<i64, StoreError> {
        self.output_entry("value", tx_id, index)
    }

    fn entry_address(&self, tx_id: &str, index: u32) -> Result<String, StoreError> {
        self.output_entry("address", tx_id, index)
    }

    fn is_spent(&self, output: &Input, spender: &str) -> Result<bool, StoreError> {
        let hit: Option<i64> = self
            .tx
            .query_row(
                "SELECT 1 FROM ledger_entries
                 WHERE kind = ?1 AND input_ref_tx_id = ?2 AND input_ref_index = ?3
                   AND tx_id <> ?4
                 LIMIT 1",
                params![EntryKind::Input.as_str(), output.tx_id, output.index, spender],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail(e: StoreError) -> StoreError {
        e
    }

    #[tokio::test]
    async fn empty_store_reports_height_zero_and_zero_balance() {
        let store = LedgerStore::in_memory().unwrap();
        let (height, balance) = store
            .read(|tx| Ok((tx.max_height()?, tx.get_balance("nobody")?)))
            .await
            .unwrap();
        assert_eq!(height, 0);
        assert_eq!(balance, 0);
    }

    #[tokio::test]
    async fn block_row_may_follow_its_entries_in_one_unit() {
        let store = LedgerStore::in_memory().unwrap();
        store
            .run_atomically(fail, |tx| {
                tx.insert_transaction("tx1", "b1", 0)?;
                tx.insert_ledger_entry(&LedgerEntry::output("tx1", "b1", 0, "A", 50))?;
                tx.insert_block("b1", 1)
            })
            .await
            .unwrap();

        let (value, address) = store
            .read(|tx| Ok((tx.entry_value("tx1", 0)?, tx.entry_address("tx1", 0)?)))
            .await
            .unwrap();
        assert_eq!(value, 50);
        assert_eq!(address, "A");
    }

    #[tokio::test]
    async fn failed_unit_leaves_nothing_behind() {
        let store = LedgerStore::in_memory().unwrap();
        let res: Result<(), StoreError> = store
            .run_atomically(fail, |tx| {
                tx.upsert_balance_delta("A", 10)?;
                tx.insert_block("b1", 1)?;
                // unique height
                tx.insert_block("b2", 1)
            })
            .await;
        assert!(res.is_err());

        let (height, balance) = store
            .read(|tx| Ok((tx.max_height()?, tx.get_balance("A")?)))
            .await
            .unwrap();
        assert_eq!(height, 0);
        assert_eq!(balance, 0);
    }

    #[tokio::test]
    async fn missing_output_is_not_found() {
        let store = LedgerStore::in_memory().unwrap();
        let err = store
            .read(|tx| tx.entry_value("ghost", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { index: 1, .. }));
    }

    #[tokio::test]
    async fn duplicate_entries_are_ignored() {
        let store = LedgerStore::in_memory().unwrap();
        let inserted = store
            .run_atomically(fail, |tx| {
                let entry = LedgerEntry::output("tx1", "b1", 0, "A", 5);
                let first = tx.insert_transaction("tx1", "b1", 0)?
                    && tx.insert_ledger_entry(&entry)?;
                let second = tx.insert_transaction("tx1", "b1", 0)?
                    || tx.insert_ledger_entry(&entry)?;
                tx.insert_block("b1", 1)?;
                Ok((first, second))
            })
            .await
            .unwrap();
        assert_eq!(inserted, (true, false));
    }

    #[tokio::test]
    async fn spent_outputs_are_tracked_per_spender() {
        let store = LedgerStore::in_memory().unwrap();
        store
            .run_atomically(fail, |tx| {
                tx.insert_transaction("tx1", "b1", 0)?;
                tx.insert_ledger_entry(&LedgerEntry::output("tx1", "b1", 0, "A", 5))?;
                tx.insert_block("b1", 1)?;
                let spent = Input { tx_id: "tx1".into(), index: 0 };
                tx.insert_transaction("tx2", "b2", 0)?;
                tx.insert_ledger_entry(&LedgerEntry::spend("tx2", "b2", 0, "A", 5, &spent))?;
                tx.insert_block("b2", 2)
            })
            .await
            .unwrap();

        let (by_other, by_self) = store
            .read(|tx| {
                let out = Input { tx_id: "tx1".into(), index: 0 };
                Ok((tx.is_spent(&out, "tx3")?, tx.is_spent(&out, "tx2")?))
            })
            .await
            .unwrap();
        assert!(by_other);
        assert!(!by_self);
    }

    #[tokio::test]
    async fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.db");
        {
            let store = LedgerStore::open(&path, Duration::from_millis(100)).unwrap();
            store
                .run_atomically(fail, |tx| {
                    tx.overwrite_balance("A", 12)?;
                    tx.insert_block("b1", 1)
                })
                .await
                .unwrap();
        }
        let store = LedgerStore::open(&path, Duration::from_millis(100)).unwrap();
        let (height, rows) = store
            .read(|tx| Ok((tx.max_height()?, tx.balance_rows()?)))
            .await
            .unwrap();
        assert_eq!(height, 1);
        assert_eq!(rows.get("A"), Some(&12));
    }
}
