use crate::{cursor::RowCursor, error::DbError, sql::postgres::params::PgParamStore};
use async_trait::async_trait;
use model::core::value::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_postgres::{Client, Portal, Transaction, types::FromSql};
use tracing::debug;

enum Command<T> {
    Fetch {
        n: usize,
        reply: oneshot::Sender<Result<Vec<T>, DbError>>,
    },
    Close {
        reply: oneshot::Sender<Result<(), DbError>>,
    },
}

/// Server-side cursor over a single-column query.
///
/// The client, its read-only transaction and the bound portal live in a
/// driver task; this handle only sends commands. Each fetch pulls exactly
/// the requested number of rows over the wire. Dropping the handle without
/// closing it stops the driver, which rolls the transaction back and
/// releases the connection.
pub struct PgCursor<T> {
    commands: Option<mpsc::Sender<Command<T>>>,
}

impl<T> PgCursor<T>
where
    T: for<'a> FromSql<'a> + Send + 'static,
{
    /// Takes ownership of `client` for the lifetime of the cursor.
    pub async fn open(
        client: Client,
        query: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<Self, DbError> {
        let (commands, rx) = mpsc::channel(1);
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(drive::<T>(client, query.into(), params, rx, ready_tx));
        ready_rx.await.map_err(|_| DbError::Closed)??;

        Ok(Self {
            commands: Some(commands),
        })
    }
}

#[async_trait]
impl<T> RowCursor<T> for PgCursor<T>
where
    T: for<'a> FromSql<'a> + Send + 'static,
{
    async fn fetch(&mut self, n: usize) -> Result<Vec<T>, DbError> {
        let commands = self.commands.as_ref().ok_or(DbError::Closed)?;
        let (reply, rx) = oneshot::channel();
        commands
            .send(Command::Fetch { n, reply })
            .await
            .map_err(|_| DbError::Closed)?;
        rx.await.map_err(|_| DbError::Closed)?
    }

    async fn close(&mut self) -> Result<(), DbError> {
        let Some(commands) = self.commands.take() else {
            return Ok(());
        };

        let (reply, rx) = oneshot::channel();
        if commands.send(Command::Close { reply }).await.is_err() {
            // Driver already gone, nothing left to release.
            return Ok(());
        }
        rx.await.map_err(|_| DbError::Closed)?
    }
}

async fn drive<T>(
    mut client: Client,
    query: String,
    params: Vec<Value>,
    mut commands: mpsc::Receiver<Command<T>>,
    ready: oneshot::Sender<Result<(), DbError>>,
) where
    T: for<'a> FromSql<'a> + Send + 'static,
{
    let tx = match client.build_transaction().read_only(true).start().await {
        Ok(tx) => tx,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    let bindings = PgParamStore::from_values(params);
    let portal = match open_portal(&tx, &query, &bindings).await {
        Ok(portal) => portal,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut position = 0u64;
    while let Some(command) = commands.recv().await {
        match command {
            Command::Fetch { n, reply } => {
                let result = fetch_rows::<T>(&tx, &portal, n, &mut position).await;
                let _ = reply.send(result);
            }
            Command::Close { reply } => {
                debug!(rows = position, "Closing input cursor");
                let _ = reply.send(tx.commit().await.map_err(DbError::from));
                return;
            }
        }
    }

    debug!(rows = position, "Input cursor abandoned, rolling back");
}

async fn open_portal(
    tx: &Transaction<'_>,
    query: &str,
    bindings: &PgParamStore,
) -> Result<Portal, DbError> {
    let statement = tx.prepare(query).await?;
    if statement.columns().len() != 1 {
        return Err(DbError::InvalidQuery(format!(
            "expected exactly one column, got {}",
            statement.columns().len()
        )));
    }

    Ok(tx.bind(&statement, &bindings.as_refs()).await?)
}

async fn fetch_rows<T>(
    tx: &Transaction<'_>,
    portal: &Portal,
    n: usize,
    position: &mut u64,
) -> Result<Vec<T>, DbError>
where
    T: for<'a> FromSql<'a>,
{
    // A max_rows of 0 would drain the whole portal.
    if n == 0 {
        return Ok(Vec::new());
    }

    let max_rows = i32::try_from(n).unwrap_or(i32::MAX);
    let rows = tx.query_portal(portal, max_rows).await?;

    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let value = row.try_get::<_, T>(0).map_err(|e| DbError::Decode {
            row: *position,
            message: e.to_string(),
        })?;
        values.push(value);
        *position += 1;
    }

    Ok(values)
}
