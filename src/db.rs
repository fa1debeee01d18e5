use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, Transaction};

use crate::error::Result;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Pending means no content column has been written yet.
const PENDING_PREDICATE: &str = "html_content IS NULL AND title IS NULL \
     AND meta_description IS NULL AND body_content IS NULL";

/// One SQLite connection onto the `phishing_data` table.
///
/// Every fetch worker opens its own `Store`; the file is the only thing they
/// share.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::configure(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS phishing_data (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                url              TEXT NOT NULL,
                label            TEXT,
                html_content     TEXT,
                title            TEXT,
                meta_description TEXT,
                body_content     TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_phishing_data_url ON phishing_data(url);
            ",
        )?;
        Ok(())
    }

    /// Open a transaction on this connection. Statements issued through the
    /// `Store` while it is alive join it.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    /// False while a transaction is open. SQLite can roll one back on its own
    /// (full disk, I/O error, `RAISE(ROLLBACK)`), after which this turns true.
    pub fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    #[cfg(test)]
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        Ok(self.conn.execute_batch(sql)?)
    }

    // ── Ingestion ──

    /// Insert `url` unless a row for it already exists. Returns whether a row
    /// was written.
    pub fn insert_if_absent(&self, url: &str, label: Option<&str>) -> Result<bool> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO phishing_data (url, label)
             SELECT ?1, ?2
             WHERE NOT EXISTS (SELECT 1 FROM phishing_data WHERE url = ?1)",
        )?;
        let changed = stmt.execute(params![url, label])?;
        Ok(changed == 1)
    }

    // ── Fetching ──

    pub fn select_pending(&self) -> Result<Vec<PendingRow>> {
        let sql = format!(
            "SELECT id, url, label FROM phishing_data WHERE {} ORDER BY id",
            PENDING_PREDICATE
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PendingRow {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    label: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Write fetched content onto the row(s) for `url`. `None` fields keep
    /// whatever the column holds; `label` is never touched. Returns the number
    /// of rows updated, so `0` means the url was never ingested.
    pub fn update_content(&self, url: &str, content: &ContentUpdate) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE phishing_data SET
                html_content     = COALESCE(?1, html_content),
                title            = COALESCE(?2, title),
                meta_description = COALESCE(?3, meta_description),
                body_content     = COALESCE(?4, body_content)
             WHERE url = ?5",
            params![
                content.html_content,
                content.title,
                content.meta_description,
                content.body_content,
                url,
            ],
        )?;
        tx.commit()?;
        Ok(changed)
    }

    // ── Stats ──

    pub fn stats(&self) -> Result<Stats> {
        let total: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM phishing_data", [], |r| r.get(0))?;
        let pending: usize = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM phishing_data WHERE {}", PENDING_PREDICATE),
            [],
            |r| r.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT COALESCE(label, '(none)'), COUNT(*)
             FROM phishing_data
             GROUP BY label
             ORDER BY COUNT(*) DESC, label",
        )?;
        let labels = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Stats {
            total,
            pending,
            fetched: total - pending,
            labels,
        })
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }

    #[cfg(test)]
    pub fn record(&self, url: &str) -> Result<Option<CrawlRecord>> {
        use rusqlite::OptionalExtension;

        let row = self
            .conn
            .query_row(
                "SELECT id, url, label, html_content, title, meta_description, body_content
                 FROM phishing_data WHERE url = ?1",
                [url],
                |row| {
                    Ok(CrawlRecord {
                        id: row.get(0)?,
                        url: row.get(1)?,
                        label: row.get(2)?,
                        html_content: row.get(3)?,
                        title: row.get(4)?,
                        meta_description: row.get(5)?,
                        body_content: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub struct CrawlRecord {
    pub id: i64,
    pub url: String,
    pub label: Option<String>,
    pub html_content: Option<String>,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub body_content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PendingRow {
    pub id: i64,
    pub url: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContentUpdate {
    pub html_content: Option<String>,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub body_content: Option<String>,
}

pub struct Stats {
    pub total: usize,
    pub pending: usize,
    pub fetched: usize,
    pub labels: Vec<(String, usize)>,
}
