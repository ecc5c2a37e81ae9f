use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tracing::warn;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::retry::{RetryPolicy, with_backoff};

/// Build a client and wait until the server answers a ping.
pub async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let policy = RetryPolicy::CONNECT;
    with_backoff(
        policy,
        |_| true,
        |attempt| {
            let database = database.clone();
            async move {
                database
                    .run_command(doc! { "ping": 1 })
                    .await
                    .map_err(|source| {
                        warn!(attempt, error = %source, "MongoDB ping failed");
                        MongoDaoError::InitialPing { attempt, source }
                    })
            }
        },
    )
    .await?;

    Ok((client, database))
}
