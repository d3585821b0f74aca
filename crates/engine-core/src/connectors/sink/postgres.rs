use crate::{connectors::sink::RawSink, error::SinkError};
use async_trait::async_trait;
use connectors::sql::postgres::utils::connect_client;
use model::records::raw::RawRecord;
use tokio_postgres::{Client, types::ToSql};
use tracing::{debug, info};

/// Columns bound per row in the upsert statement.
const COLUMNS: usize = 10;

/// Rows per INSERT statement; keeps the bind count well under the
/// protocol limit of 65535 parameters.
const ROWS_PER_STATEMENT: usize = 500;

/// Raw table in PostgreSQL with the fingerprint as primary key.
pub struct PgRawSink {
    client: Client,
    table: String,
}

impl PgRawSink {
    pub async fn connect(url: &str, table: &str) -> Result<Self, SinkError> {
        let client = connect_client(url).await?;
        Self::new(client, table)
    }

    pub fn new(client: Client, table: &str) -> Result<Self, SinkError> {
        validate_table_name(table)?;
        Ok(Self {
            client,
            table: table.to_string(),
        })
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                fingerprint TEXT PRIMARY KEY,
                params_digest TEXT NOT NULL,
                params TEXT NOT NULL,
                batch_digest TEXT NOT NULL,
                page_index BIGINT NOT NULL,
                record_index BIGINT NOT NULL,
                input TEXT NOT NULL,
                url TEXT NOT NULL,
                data BYTEA NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )",
            table = self.table
        )
    }

    fn upsert_sql(&self, rows: usize) -> String {
        let values = (0..rows)
            .map(|row| {
                let placeholders = (1..=COLUMNS)
                    .map(|col| format!("${}", row * COLUMNS + col))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({placeholders})")
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT INTO {table} (fingerprint, params_digest, params, batch_digest, page_index, \
             record_index, input, url, data, created_at) VALUES {values} \
             ON CONFLICT (fingerprint) DO UPDATE SET \
             params_digest = EXCLUDED.params_digest, params = EXCLUDED.params, \
             batch_digest = EXCLUDED.batch_digest, page_index = EXCLUDED.page_index, \
             record_index = EXCLUDED.record_index, input = EXCLUDED.input, \
             url = EXCLUDED.url, data = EXCLUDED.data, created_at = EXCLUDED.created_at",
            table = self.table
        )
    }
}

#[async_trait]
impl RawSink for PgRawSink {
    async fn prepare(&self, params_digest: &str, purge: bool) -> Result<(), SinkError> {
        self.client.batch_execute(&self.create_table_sql()).await?;

        if purge {
            let sql = format!("DELETE FROM {} WHERE params_digest = $1", self.table);
            let removed = self.client.execute(&sql, &[&params_digest]).await?;
            info!(table = %self.table, params = %params_digest, removed, "Purged previous raw rows");
        }

        Ok(())
    }

    async fn store(&self, records: &[RawRecord]) -> Result<(), SinkError> {
        for chunk in records.chunks(ROWS_PER_STATEMENT) {
            let positions: Vec<(i64, i64)> = chunk
                .iter()
                .map(|r| (r.page_index as i64, r.record_index as i64))
                .collect();

            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * COLUMNS);
            for (record, (page, idx)) in chunk.iter().zip(&positions) {
                params.push(&record.fingerprint);
                params.push(&record.params_digest);
                params.push(&record.params);
                params.push(&record.batch_digest);
                params.push(page);
                params.push(idx);
                params.push(&record.input);
                params.push(&record.url);
                params.push(&record.payload);
                params.push(&record.collected_at);
            }

            self.client
                .execute(&self.upsert_sql(chunk.len()), &params)
                .await?;
        }

        debug!(table = %self.table, count = records.len(), "Stored raw records");
        Ok(())
    }
}

/// Accepts `name` or `schema.name` made of ASCII identifiers.
fn validate_table_name(table: &str) -> Result<(), SinkError> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|p| valid_part(p)) {
        return Err(SinkError::InvalidTable(table.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names() {
        assert!(validate_table_name("_raw_jira_api_epics").is_ok());
        assert!(validate_table_name("raw.jira_epics").is_ok());
        assert!(validate_table_name("epics; DROP TABLE x").is_err());
        assert!(validate_table_name("1epics").is_err());
        assert!(validate_table_name("a.b.c").is_err());
        assert!(validate_table_name("").is_err());
    }
}
