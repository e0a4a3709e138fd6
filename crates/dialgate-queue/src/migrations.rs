//! SurrealDB schema migrations and initialization
//!
//! Sets up the queue tables with their unique constraints and indexes.
//! Safe to call on every connect (idempotent).

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::BrokerError;
use crate::queue_traits::BrokerResult;

/// Initialize all dialgate queue tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> BrokerResult<()> {
    info!("Initializing dialgate queue schema");

    init_queues_table(db).await?;
    init_messages_table(db).await?;
    init_consumers_table(db).await?;

    info!("dialgate queue schema initialization complete");
    Ok(())
}

/// Initialize `queues` table
///
/// Schema:
/// ```text
/// TABLE queues {
///   id:        queues:⟨name⟩
///   name:      STRING
///   next_seq:  INT (last assigned message seq)
/// }
/// ```
async fn init_queues_table(db: &Surreal<Any>) -> BrokerResult<()> {
    debug!("Initializing queues table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS queues SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_queue_name ON TABLE queues COLUMNS name UNIQUE;
    "#;
    run(db, sql).await
}

/// Initialize `queue_messages` table
///
/// A row exists while the message is pending; acking deletes it.
///
/// ```text
/// TABLE queue_messages {
///   message_id:    STRING (unique)
///   queue:         STRING (indexed with seq)
///   seq:           INT
///   payload:       STRING (JSON text)
///   published_at:  DATETIME
/// }
/// ```
async fn init_messages_table(db: &Surreal<Any>) -> BrokerResult<()> {
    debug!("Initializing queue_messages table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS queue_messages SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_message_id ON TABLE queue_messages COLUMNS message_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_queue_seq ON TABLE queue_messages COLUMNS queue, seq UNIQUE;
    "#;
    run(db, sql).await
}

/// Initialize `queue_consumers` table
///
/// ```text
/// TABLE queue_consumers {
///   tag:            STRING (unique)
///   queue:          STRING (indexed)
///   channel_id:     STRING
///   registered_at:  DATETIME
/// }
/// ```
async fn init_consumers_table(db: &Surreal<Any>) -> BrokerResult<()> {
    debug!("Initializing queue_consumers table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS queue_consumers SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_consumer_tag ON TABLE queue_consumers COLUMNS tag UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_consumer_queue ON TABLE queue_consumers COLUMNS queue;
    "#;
    run(db, sql).await
}

async fn run(db: &Surreal<Any>, sql: &str) -> BrokerResult<()> {
    db.query(sql)
        .await
        .map_err(|e| BrokerError::SchemaSetup(e.to_string()))?
        .check()
        .map_err(|e| BrokerError::SchemaSetup(e.to_string()))?;
    Ok(())
}
