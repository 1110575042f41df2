//! MongoDB database wrapper.

use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{options::ClientOptions, Client, Collection, IndexModel};
use tracing::info;

use super::models::SimpleOption;
use super::repository::OPTIONS_COLLECTION;

/// Database wrapper for MongoDB operations.
#[derive(Debug, Clone)]
pub struct Database {
    db: mongodb::Database,
}

impl Database {
    /// Connect to MongoDB with the given URI and database name.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(uri: &str, db_name: &str) -> anyhow::Result<Self> {
        let options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(options)?;

        // Ping the database to verify connection
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;

        info!("Successfully connected to MongoDB");

        Ok(Self {
            db: client.database(db_name),
        })
    }

    /// Create the indexes the repositories rely on.
    ///
    /// `(chat_id, name)` is unique so concurrent upserts cannot duplicate an option.
    pub async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "chat_id": 1, "name": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        self.collection::<SimpleOption>(OPTIONS_COLLECTION)
            .create_index(index)
            .await?;

        info!("Indexes ensured for {}", OPTIONS_COLLECTION);
        Ok(())
    }

    /// Get a typed collection from the database.
    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.db.collection(name)
    }
}
