//! SQLite entity store
//!
//! Ids are stored as their canonical strings, other addresses, hashes and
//! amounts as BLOBs. A changeset is written inside one SQL transaction.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use coven_common::{
    address_to_blob, address_to_hex, blob_to_address, blob_to_hash, blob_to_u256, hash_to_blob,
    u256_to_blob,
};
use primitive_types::H160;
use rusqlite::{params, Connection, OptionalExtension};

use super::{Changeset, EntityStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{Account, MarketplaceInteraction, Transfer};
use crate::registry::Marketplace;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    send_count INTEGER NOT NULL DEFAULT 0,
    receive_count INTEGER NOT NULL DEFAULT 0,
    mint_count INTEGER NOT NULL DEFAULT 0,
    burn_count INTEGER NOT NULL DEFAULT 0,
    total_spent BLOB NOT NULL,
    unique_marketplace_count INTEGER NOT NULL DEFAULT 0,
    last_tx_hash BLOB
);

CREATE TABLE IF NOT EXISTS transfers (
    id TEXT PRIMARY KEY,
    collection BLOB NOT NULL,
    from_addr BLOB NOT NULL,
    to_addr BLOB NOT NULL,
    token_id BLOB NOT NULL,
    value BLOB NOT NULL,
    marketplace TEXT NOT NULL,
    tx_hash BLOB NOT NULL,
    log_index INTEGER NOT NULL,
    block_number INTEGER,
    timestamp INTEGER
);
CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers(from_addr);
CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers(to_addr);
CREATE INDEX IF NOT EXISTS idx_transfers_block ON transfers(block_number DESC);
CREATE INDEX IF NOT EXISTS idx_transfers_marketplace ON transfers(marketplace);

CREATE TABLE IF NOT EXISTS marketplace_interactions (
    id TEXT PRIMARY KEY,
    account TEXT NOT NULL REFERENCES accounts(id),
    marketplace TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_interactions_account ON marketplace_interactions(account);
";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. `:memory:` opens a private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;
             PRAGMA cache_size=-64000;
             PRAGMA temp_store=MEMORY;
             PRAGMA busy_timeout=5000;",
        )?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!(
            target: "coven_marketplace::storage",
            db_path = %path.display(),
            "Marketplace database initialized"
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::open(":memory:")
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn parse_marketplace(entity: &'static str, id: &str, raw: &str) -> StoreResult<Marketplace> {
    Marketplace::from_str(raw).map_err(|e| StoreError::Corrupt {
        entity,
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn count(conn: &Connection, table: &str) -> StoreResult<u64> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(n as u64)
}

impl EntityStore for SqliteStore {
    fn load_account(&self, id: H160) -> StoreResult<Option<Account>> {
        let conn = self.lock()?;
        let account = conn
            .query_row(
                "SELECT send_count, receive_count, mint_count, burn_count, total_spent,
                        unique_marketplace_count, last_tx_hash
                 FROM accounts WHERE id = ?1",
                params![address_to_hex(id)],
                |row| {
                    Ok(Account {
                        id,
                        send_count: row.get::<_, i64>(0)? as u64,
                        receive_count: row.get::<_, i64>(1)? as u64,
                        mint_count: row.get::<_, i64>(2)? as u64,
                        burn_count: row.get::<_, i64>(3)? as u64,
                        total_spent: blob_to_u256(&row.get::<_, Vec<u8>>(4)?),
                        unique_marketplace_count: row.get::<_, i64>(5)? as u64,
                        last_tx_hash: row
                            .get::<_, Option<Vec<u8>>>(6)?
                            .map(|b| blob_to_hash(&b)),
                    })
                },
            )
            .optional()?;
        Ok(account)
    }

    fn load_transfer(&self, id: &str) -> StoreResult<Option<Transfer>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT collection, from_addr, to_addr, token_id, value, marketplace, tx_hash,
                        log_index, block_number, timestamp
                 FROM transfers WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Vec<u8>>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, Option<i64>>(8)?,
                        row.get::<_, Option<i64>>(9)?,
                    ))
                },
            )
            .optional()?;

        let Some((collection, from, to, token_id, value, marketplace, tx_hash, log_index, block, ts)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(Transfer {
            id: id.to_string(),
            collection: blob_to_address(&collection),
            from: blob_to_address(&from),
            to: blob_to_address(&to),
            token_id: blob_to_u256(&token_id),
            value: blob_to_u256(&value),
            marketplace: parse_marketplace("transfer", id, &marketplace)?,
            transaction_hash: blob_to_hash(&tx_hash),
            log_index: log_index as u64,
            block_number: block.map(|b| b as u64),
            timestamp: ts.map(|t| t as u64),
        }))
    }

    fn load_interaction(&self, id: &str) -> StoreResult<Option<MarketplaceInteraction>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT account, marketplace FROM marketplace_interactions WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((account, marketplace)) = row else {
            return Ok(None);
        };
        let account = coven_common::parse_address(&account).ok_or_else(|| StoreError::Corrupt {
            entity: "interaction",
            id: id.to_string(),
            reason: format!("invalid account '{account}'"),
        })?;

        Ok(Some(MarketplaceInteraction {
            id: id.to_string(),
            account,
            marketplace: parse_marketplace("interaction", id, &marketplace)?,
        }))
    }

    fn commit(&self, changes: &Changeset) -> StoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        {
            let mut account_stmt = tx.prepare_cached(
                "INSERT INTO accounts (id, send_count, receive_count, mint_count, burn_count,
                                       total_spent, unique_marketplace_count, last_tx_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    send_count = excluded.send_count,
                    receive_count = excluded.receive_count,
                    mint_count = excluded.mint_count,
                    burn_count = excluded.burn_count,
                    total_spent = excluded.total_spent,
                    unique_marketplace_count = excluded.unique_marketplace_count,
                    last_tx_hash = excluded.last_tx_hash",
            )?;
            for account in &changes.accounts {
                account_stmt.execute(params![
                    account.key(),
                    account.send_count as i64,
                    account.receive_count as i64,
                    account.mint_count as i64,
                    account.burn_count as i64,
                    u256_to_blob(account.total_spent),
                    account.unique_marketplace_count as i64,
                    account.last_tx_hash.map(hash_to_blob),
                ])?;
            }

            if let Some(transfer) = &changes.transfer {
                let inserted = tx.prepare_cached(
                    "INSERT OR IGNORE INTO transfers (id, collection, from_addr, to_addr, token_id, value,
                                                      marketplace, tx_hash, log_index, block_number, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?
                .execute(params![
                    transfer.id,
                    address_to_blob(transfer.collection),
                    address_to_blob(transfer.from),
                    address_to_blob(transfer.to),
                    u256_to_blob(transfer.token_id),
                    u256_to_blob(transfer.value),
                    transfer.marketplace.as_str(),
                    hash_to_blob(transfer.transaction_hash),
                    transfer.log_index as i64,
                    transfer.block_number.map(|b| b as i64),
                    transfer.timestamp.map(|t| t as i64),
                ])?;

                // Dropping `tx` without commit rolls the account upserts back.
                if inserted == 0 {
                    return Err(StoreError::DuplicateTransfer(transfer.id.clone()));
                }
            }

            let mut interaction_stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO marketplace_interactions (id, account, marketplace)
                 VALUES (?1, ?2, ?3)",
            )?;
            for interaction in &changes.interactions {
                interaction_stmt.execute(params![
                    interaction.id,
                    address_to_hex(interaction.account),
                    interaction.marketplace.as_str(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn account_count(&self) -> StoreResult<u64> {
        let conn = self.lock()?;
        count(&conn, "accounts")
    }

    fn transfer_count(&self) -> StoreResult<u64> {
        let conn = self.lock()?;
        count(&conn, "transfers")
    }

    fn interactions_for(&self, account: H160) -> StoreResult<Vec<MarketplaceInteraction>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, marketplace FROM marketplace_interactions WHERE account = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![address_to_hex(account)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, marketplace)| {
                let marketplace = parse_marketplace("interaction", &id, &marketplace)?;
                Ok(MarketplaceInteraction {
                    id,
                    account,
                    marketplace,
                })
            })
            .collect()
    }
}
