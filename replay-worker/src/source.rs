use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Local, NaiveDate};
use replay_common::record::{InputRecord, PrefixMetadata};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::error::SourceError;

/// Supplies the recorded invoices to replay.
#[async_trait]
pub trait RecordSource {
    /// Read up to `limit` records.
    async fn fetch(&self, limit: usize) -> Result<Vec<InputRecord>, SourceError>;
}

/// Records that are already in memory.
pub struct VecRecordSource {
    records: Vec<InputRecord>,
}

impl VecRecordSource {
    pub fn new(records: Vec<InputRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl RecordSource for VecRecordSource {
    async fn fetch(&self, limit: usize) -> Result<Vec<InputRecord>, SourceError> {
        Ok(self.records.iter().take(limit).cloned().collect())
    }
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: i64,
    input_xml: Vec<u8>,
    transaction_date: NaiveDate,
    external_company_id: String,
    invoice_num: String,
}

impl From<InvoiceRow> for InputRecord {
    fn from(row: InvoiceRow) -> Self {
        InputRecord {
            document: Bytes::from(row.input_xml),
            prefix: PrefixMetadata {
                captured_at: Local::now().naive_local(),
                original_date: row.transaction_date,
                company: row.external_company_id,
                invoice: row.invoice_num,
            },
        }
    }
}

/// Recorded invoices stored in a PostgreSQL table, read page by page.
///
/// Only invoices with a stored request transacted on or after `cutoff` are read.
pub struct PgRecordSource {
    table: String,
    pool: PgPool,
    cutoff: NaiveDate,
    page_size: usize,
}

impl PgRecordSource {
    pub async fn new(
        table: &str,
        url: &str,
        max_connections: u32,
        cutoff: NaiveDate,
        page_size: usize,
    ) -> Result<Self, SourceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| SourceError::ConnectionError { error })?;

        Ok(Self::new_from_pool(table, pool, cutoff, page_size))
    }

    pub fn new_from_pool(table: &str, pool: PgPool, cutoff: NaiveDate, page_size: usize) -> Self {
        Self {
            table: table.to_owned(),
            pool,
            cutoff,
            page_size: page_size.max(1),
        }
    }

    /// Read up to `size` rows whose id is greater than `after`, in id order.
    async fn fetch_page(&self, after: i64, size: usize) -> Result<Vec<InvoiceRow>, SourceError> {
        // TODO: Escaping. sqlx can't bind identifiers, so the table name comes straight from config.
        let base_query = format!(
            r#"
SELECT
    id,
    input_xml,
    transaction_date::date AS transaction_date,
    external_company_id::text AS external_company_id,
    invoice_num::text AS invoice_num
FROM
    "{}"
WHERE
    input_xml IS NOT NULL
    AND transaction_date >= $1
    AND id > $2
ORDER BY
    id
LIMIT $3
            "#,
            &self.table
        );

        sqlx::query_as::<_, InvoiceRow>(&base_query)
            .bind(self.cutoff)
            .bind(after)
            .bind(size as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| SourceError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })
    }
}

#[async_trait]
impl RecordSource for PgRecordSource {
    async fn fetch(&self, limit: usize) -> Result<Vec<InputRecord>, SourceError> {
        let mut records = Vec::with_capacity(limit.min(self.page_size));
        let mut last_id = 0;

        while records.len() < limit {
            let size = self.page_size.min(limit - records.len());
            let page = self.fetch_page(last_id, size).await?;
            let exhausted = page.len() < size;

            if let Some(row) = page.last() {
                last_id = row.id;
            }

            records.extend(page.into_iter().map(InputRecord::from));
            info!(records = records.len(), "read page of recorded invoices");

            if exhausted {
                break;
            }
        }

        Ok(records)
    }
}
