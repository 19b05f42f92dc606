use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL")
                .unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE")
                .unwrap_or_else(|_| "lyra".to_string()),
            database: env::var("SURREALDB_DATABASE")
                .unwrap_or_else(|_| "control".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = vec![
        // Environments are written by the lifecycle manager; this service
        // only rewrites the credential columns.
        "DEFINE TABLE IF NOT EXISTS environment SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS uid ON TABLE environment TYPE string;
         DEFINE FIELD IF NOT EXISTS name ON TABLE environment TYPE string;
         DEFINE FIELD IF NOT EXISTS status ON TABLE environment TYPE string;
         DEFINE FIELD IF NOT EXISTS gpu_indices ON TABLE environment TYPE array<int> DEFAULT [];
         DEFINE FIELD IF NOT EXISTS worker_server_id ON TABLE environment TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS root_password ON TABLE environment TYPE string DEFAULT '__redacted__';
         DEFINE FIELD IF NOT EXISTS root_password_encrypted ON TABLE environment TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS updated_at ON TABLE environment VALUE time::now();",

        "DEFINE TABLE IF NOT EXISTS worker_server SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS uid ON TABLE worker_server TYPE string;
         DEFINE FIELD IF NOT EXISTS name ON TABLE worker_server TYPE string;
         DEFINE FIELD IF NOT EXISTS base_url ON TABLE worker_server TYPE string;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE worker_server VALUE time::now();",

        "DEFINE INDEX IF NOT EXISTS environment_uid ON TABLE environment COLUMNS uid UNIQUE;
         DEFINE INDEX IF NOT EXISTS environment_status ON TABLE environment COLUMNS status;
         DEFINE INDEX IF NOT EXISTS worker_server_uid ON TABLE worker_server COLUMNS uid UNIQUE;",
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    Ok(())
}
