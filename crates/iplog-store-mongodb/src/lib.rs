// # MongoDB Storage Backend
//
// This crate provides the MongoDB implementation of `IpStore` for the
// iplog worker.
//
// ## Behavior
//
// - One `update` command per class per cycle (unordered, upsert per address)
// - `$setOnInsert` writes `first_seen` only when the document is created
// - `$max` advances `last_seen` and never moves it backwards
// - A unique index on `ip` in each collection backs the one-record-per-address rule
// - Duplicate key errors (code 11000) surface as `Error::DuplicateKey` so the
//   coordinator retries the batch, which then resolves to updates
// - A `writeConcernError` in the reply surfaces as `Error::StorageUnavailable`
// - `mongodb+srv://` clients are built on first use, so SRV lookup failures
//   are retried like any other outage
// - No retry logic here: one attempt per call, retries belong to `UpsertCoordinator`
//
// ## Security
//
// The connection string may carry credentials. It is never logged verbatim;
// see `redact_uri`.
//
// ## Command Reference
//
// ```text
// { update: "<collection>",
//   updates: [ { q: { ip }, u: { $max: { last_seen }, $setOnInsert: { first_seen } }, upsert: true }, ... ],
//   ordered: false }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iplog_core::config::{CollectionNames, StorageConfig};
use iplog_core::extract::AddressClass;
use iplog_core::traits::{AddressRecord, IpStore, IpStoreFactory, UpsertCounts};
use iplog_core::{Error, Result, StoreRegistry};
use mongodb::bson::{self, Bson, Document, doc};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Server error code for a unique index violation
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Statements per `update` command
///
/// Well below the server's maxWriteBatchSize so a batch also stays far
/// from the 16 MiB command limit.
const MAX_STATEMENTS_PER_COMMAND: usize = 10_000;

/// Application name reported to the server
const APP_NAME: &str = "iplogd";

/// MongoDB-backed IpStore
///
/// Holds one long-lived client; the driver pools connections internally and
/// reconnects on its own after outages.
///
/// For `mongodb+srv://` URIs the client is built on first use, because
/// parsing such a URI resolves SRV and TXT records. A DNS failure then
/// surfaces from [`IpStore::ping`] as a retryable error instead of failing
/// store construction.
pub struct MongoIpStore {
    client: OnceCell<Client>,
    uri: String,
    database: String,
    collections: CollectionNames,
    timeout: Duration,
}

// Custom Debug implementation that hides credentials in the URI
impl std::fmt::Debug for MongoIpStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoIpStore")
            .field("uri", &redact_uri(&self.uri))
            .field("database", &self.database)
            .field("collections", &self.collections)
            .field("connected", &self.client.initialized())
            .finish()
    }
}

impl MongoIpStore {
    /// Build a store from a connection string
    ///
    /// No connection is made here; the first [`IpStore::ping`] is where an
    /// unreachable server shows up. Plain `mongodb://` URIs are parsed right
    /// away so a malformed one is reported as a configuration error.
    pub async fn connect(
        uri: &str,
        database: &str,
        collections: CollectionNames,
        timeout: Duration,
    ) -> Result<Self> {
        let client = if uri.starts_with("mongodb+srv://") {
            OnceCell::new()
        } else {
            OnceCell::new_with(Some(build_client(uri, timeout).await?))
        };

        tracing::info!(
            "MongoDB store configured: {} (database: {})",
            redact_uri(uri),
            database
        );

        Ok(Self {
            client,
            uri: uri.to_string(),
            database: database.to_string(),
            collections,
            timeout,
        })
    }

    async fn database(&self) -> Result<Database> {
        let client = self
            .client
            .get_or_try_init(|| build_client(&self.uri, self.timeout))
            .await?;
        Ok(client.database(&self.database))
    }

    async fn collection(&self, class: AddressClass) -> Result<Collection<Document>> {
        Ok(self.database().await?.collection(self.collections.name(class)))
    }
}

/// Parse `uri` and create a driver client (does not connect)
async fn build_client(uri: &str, timeout: Duration) -> Result<Client> {
    let mut options = ClientOptions::parse(uri).await.map_err(map_error)?;
    options.app_name = Some(APP_NAME.to_string());
    options.connect_timeout = Some(timeout);
    options.server_selection_timeout = Some(timeout);

    Client::with_options(options).map_err(map_error)
}

#[async_trait]
impl IpStore for MongoIpStore {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> Result<()> {
        self.database()
            .await?
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn ensure_unique_index(&self, class: AddressClass) -> Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "ip": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        self.collection(class)
            .await?
            .create_index(index)
            .await
            .map_err(map_error)?;

        tracing::debug!("Unique ip index ensured on {}", self.collections.name(class));
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        class: AddressClass,
        ips: &[String],
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertCounts> {
        let name = self.collections.name(class);
        let database = self.database().await?;
        let mut counts = UpsertCounts::default();

        for batch in ips.chunks(MAX_STATEMENTS_PER_COMMAND) {
            let command = build_upsert_command(name, batch, seen_at);
            let reply = database
                .run_command(command)
                .await
                .map_err(map_error)?;
            counts += parse_update_reply(&reply)?;
        }

        Ok(counts)
    }

    async fn get_record(&self, class: AddressClass, ip: &str) -> Result<Option<AddressRecord>> {
        let found = self
            .collection(class)
            .await?
            .find_one(doc! { "ip": ip })
            .await
            .map_err(map_error)?;

        found.as_ref().map(record_from_document).transpose()
    }

    async fn count(&self, class: AddressClass) -> Result<u64> {
        self.collection(class)
            .await?
            .count_documents(doc! {})
            .await
            .map_err(map_error)
    }

    async fn flush(&self) -> Result<()> {
        // Writes are acknowledged before bulk_upsert returns
        Ok(())
    }
}

/// Build the unordered upsert command for one batch
pub fn build_upsert_command(collection: &str, ips: &[String], seen_at: DateTime<Utc>) -> Document {
    let seen_at = bson::DateTime::from_millis(seen_at.timestamp_millis());

    let updates: Vec<Bson> = ips
        .iter()
        .map(|ip| {
            Bson::Document(doc! {
                "q": { "ip": ip.as_str() },
                "u": {
                    "$max": { "last_seen": seen_at },
                    "$setOnInsert": { "first_seen": seen_at },
                },
                "upsert": true,
            })
        })
        .collect();

    doc! {
        "update": collection,
        "updates": updates,
        "ordered": false,
    }
}

/// Turn an `update` command reply into inserted/updated counts
///
/// `n` counts matched plus upserted statements, so updates are `n` minus
/// the length of `upserted`.
pub fn parse_update_reply(reply: &Document) -> Result<UpsertCounts> {
    if let Ok(errors) = reply.get_array("writeErrors")
        && let Some(first) = errors.first()
    {
        let (code, message) = match first {
            Bson::Document(err) => (
                err.get_i32("code").unwrap_or_default(),
                err.get_str("errmsg").unwrap_or("unknown write error").to_string(),
            ),
            other => (0, other.to_string()),
        };

        return Err(if code == DUPLICATE_KEY_CODE {
            Error::duplicate_key(message)
        } else {
            Error::storage(format!(
                "{} of the batch failed, first error (code {}): {}",
                errors.len(),
                code,
                message
            ))
        });
    }

    if let Ok(concern) = reply.get_document("writeConcernError") {
        let message = concern.get_str("errmsg").unwrap_or("write concern not satisfied");
        return Err(Error::storage_unavailable(format!(
            "Write concern error (code {}): {}",
            concern.get_i32("code").unwrap_or_default(),
            message
        )));
    }

    let n = reply
        .get("n")
        .and_then(as_count)
        .ok_or_else(|| Error::storage("update reply is missing 'n'"))?;
    let inserted = reply
        .get_array("upserted")
        .map(|upserted| upserted.len() as u64)
        .unwrap_or(0);

    Ok(UpsertCounts::new(inserted, n.saturating_sub(inserted)))
}

/// Convert a stored document into an [`AddressRecord`]
///
/// Timestamps are BSON dates. Documents holding epoch seconds as numbers
/// are read as well.
pub fn record_from_document(document: &Document) -> Result<AddressRecord> {
    let ip = document
        .get_str("ip")
        .map_err(|e| Error::storage(format!("record without ip: {}", e)))?;

    let first_seen = document
        .get("first_seen")
        .and_then(as_datetime)
        .ok_or_else(|| Error::storage(format!("record {} has no valid first_seen", ip)))?;
    let last_seen = document
        .get("last_seen")
        .and_then(as_datetime)
        .ok_or_else(|| Error::storage(format!("record {} has no valid last_seen", ip)))?;

    Ok(AddressRecord {
        ip: ip.to_string(),
        first_seen,
        last_seen,
    })
}

fn as_count(value: &Bson) -> Option<u64> {
    match value {
        Bson::Int32(n) => u64::try_from(*n).ok(),
        Bson::Int64(n) => u64::try_from(*n).ok(),
        Bson::Double(n) if *n >= 0.0 => Some(*n as u64),
        _ => None,
    }
}

fn as_datetime(value: &Bson) -> Option<DateTime<Utc>> {
    match value {
        Bson::DateTime(dt) => DateTime::from_timestamp_millis(dt.timestamp_millis()),
        Bson::Double(secs) => DateTime::from_timestamp_millis((*secs * 1000.0) as i64),
        Bson::Int64(secs) => DateTime::from_timestamp(*secs, 0),
        Bson::Int32(secs) => DateTime::from_timestamp(i64::from(*secs), 0),
        _ => None,
    }
}

/// Map a driver error onto the worker's error kinds
///
/// Bad connection strings are configuration errors; duplicate keys are
/// reported as such; any other server-side command failure is permanent.
/// Everything else (server selection, I/O, pool resets) is treated as the
/// backend being unavailable.
fn map_error(err: mongodb::error::Error) -> Error {
    match err.kind.as_ref() {
        ErrorKind::InvalidArgument { message, .. } => {
            Error::config(format!("Invalid MongoDB configuration: {}", message))
        }
        ErrorKind::Command(command) if command.code == DUPLICATE_KEY_CODE => {
            Error::duplicate_key(command.message.clone())
        }
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE => {
            Error::duplicate_key(write.message.clone())
        }
        ErrorKind::Command(command) => Error::storage(format!(
            "MongoDB command failed ({}): {}",
            command.code, command.message
        )),
        _ => Error::storage_unavailable(err.to_string()),
    }
}

/// Replace the password in `user:password@` with `***`
pub fn redact_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://").map(|i| i + 3) else {
        return uri.to_string();
    };
    let authority_end = uri[scheme_end..]
        .find('/')
        .map(|i| scheme_end + i)
        .unwrap_or(uri.len());
    let authority = &uri[scheme_end..authority_end];

    match authority.rfind('@') {
        Some(at) => {
            let user = authority[..at].split(':').next().unwrap_or_default();
            format!(
                "{}{}:***{}",
                &uri[..scheme_end],
                user,
                &uri[scheme_end + at..]
            )
        }
        None => uri.to_string(),
    }
}

/// Factory for creating MongoDB stores
pub struct MongoIpStoreFactory;

#[async_trait]
impl IpStoreFactory for MongoIpStoreFactory {
    async fn create(&self, config: &StorageConfig) -> Result<Arc<dyn IpStore>> {
        match config {
            StorageConfig::Mongodb {
                uri,
                database,
                collections,
                timeout_secs,
            } => {
                let store = MongoIpStore::connect(
                    uri,
                    database,
                    collections.clone(),
                    Duration::from_secs(*timeout_secs),
                )
                .await?;
                Ok(Arc::new(store))
            }
            other => Err(Error::config(format!(
                "MongoDB store cannot be built from '{}' configuration",
                other.type_name()
            ))),
        }
    }
}

/// Register the MongoDB backend with a registry
///
/// # Example
///
/// ```rust
/// use iplog_core::StoreRegistry;
///
/// let registry = StoreRegistry::with_builtin();
/// iplog_store_mongodb::register(&registry);
/// assert!(registry.has_store("mongodb"));
/// ```
pub fn register(registry: &StoreRegistry) {
    registry.register_store("mongodb", Box::new(MongoIpStoreFactory));
}
