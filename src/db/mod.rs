//! Test database provisioning and teardown.
//!
//! The provisioner prepares an isolated PostgreSQL database for one test
//! session through a maintenance ("admin") connection, and drops it again at
//! teardown unless the session asked to keep it. The admin operations sit
//! behind the [`AdminClient`] trait so provisioning logic can be unit-tested
//! without a live PostgreSQL server.
//!
//! Release is exactly-once by construction: [`DatabaseHandle::teardown`]
//! consumes the handle, so a second teardown of the same database is a
//! compile error rather than a runtime bug.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sqlx::{Connection, Executor, PgConnection};

use crate::error::{DatabaseError, Result};

/// Boxed future type returned by [`AdminClient`] state-changing operations.
pub type AdminFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<(), DatabaseError>> + Send + 'a>>;

/// Boxed future type returned by [`AdminClient::database_exists`].
pub type ExistsFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<bool, DatabaseError>> + Send + 'a>>;

/// Boxed future type returned by [`DatabaseProvisioner::setup`].
pub type SetupFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Box<dyn DatabaseHandle>>> + Send + 'a>>;

/// Boxed future type returned by [`DatabaseHandle::teardown`].
///
/// `'static` because teardown consumes the handle and owns everything it
/// needs.
pub type TeardownFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// Administrative operations on the database server.
///
/// This abstraction keeps provisioning logic testable without a live
/// PostgreSQL server. Implementations may assume the database name has
/// already been validated by [`validate_database_name`].
pub trait AdminClient: Send + Sync {
    /// Check whether a database with the given name exists.
    fn database_exists(&self, name: &str) -> ExistsFuture<'_>;

    /// Create a database with the given name.
    fn create_database(&self, name: &str) -> AdminFuture<'_>;

    /// Drop the database with the given name.
    fn drop_database(&self, name: &str) -> AdminFuture<'_>;
}

/// An active ephemeral test database.
///
/// Owned exclusively by the session controller for the duration of the run;
/// destroyed (dropped or preserved per `keepdb`) exactly once, in teardown.
pub trait DatabaseHandle: Send {
    /// The database name, for narration.
    fn name(&self) -> &str;

    /// Release the database: drop it unless `keepdb` is set.
    ///
    /// Consumes the handle, making a double release impossible.
    fn teardown(self: Box<Self>, keepdb: bool) -> TeardownFuture;
}

/// Prepares an isolated test database for one session.
pub trait DatabaseProvisioner: Send + Sync {
    /// Prepare the test database, creating it if absent or reusing an
    /// existing one when `keepdb` is set.
    fn setup(&self, keepdb: bool) -> SetupFuture<'_>;
}

/// Validate that a database name is a safe SQL identifier.
///
/// Database names cannot be bound as SQL parameters, so `CREATE DATABASE`
/// and `DROP DATABASE` statements interpolate the (double-quoted) name.
/// This check is what makes that interpolation safe.
///
/// # Errors
///
/// Returns [`DatabaseError::InvalidName`] when the name is empty, starts
/// with a digit, or contains characters outside `[A-Za-z0-9_]`.
pub fn validate_database_name(name: &str) -> std::result::Result<(), DatabaseError> {
    if name.is_empty() {
        return Err(DatabaseError::InvalidName {
            name: String::from(name),
            reason: String::from("must not be empty"),
        });
    }
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err(DatabaseError::InvalidName {
            name: String::from(name),
            reason: String::from("must not start with a digit"),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(DatabaseError::InvalidName {
            name: String::from(name),
            reason: String::from("contains characters outside [A-Za-z0-9_]"),
        });
    }
    Ok(())
}

/// [`AdminClient`] implementation over a PostgreSQL maintenance connection.
///
/// Each operation opens a fresh connection to the configured maintenance
/// URL; `CREATE DATABASE`/`DROP DATABASE` cannot run inside the pooled
/// transaction machinery anyway, and a session performs a handful of admin
/// operations in total.
pub struct SqlxAdmin {
    admin_url: String,
}

impl SqlxAdmin {
    /// Create an admin client for the given maintenance URL.
    #[must_use]
    pub fn new(admin_url: impl Into<String>) -> Self {
        Self {
            admin_url: admin_url.into(),
        }
    }

    async fn connect(&self) -> std::result::Result<PgConnection, DatabaseError> {
        PgConnection::connect(&self.admin_url)
            .await
            .map_err(|e| DatabaseError::AdminConnectionFailed {
                message: e.to_string(),
            })
    }
}

impl AdminClient for SqlxAdmin {
    fn database_exists(&self, name: &str) -> ExistsFuture<'_> {
        let name_owned = String::from(name);
        Box::pin(async move {
            let mut conn = self.connect().await?;
            let row = sqlx::query("SELECT 1 FROM pg_database WHERE datname = $1")
                .bind(&name_owned)
                .fetch_optional(&mut conn)
                .await
                .map_err(|e| DatabaseError::ProvisioningFailed {
                    name: name_owned.clone(),
                    message: e.to_string(),
                })?;
            drop(conn.close().await);
            Ok(row.is_some())
        })
    }

    fn create_database(&self, name: &str) -> AdminFuture<'_> {
        let name_owned = String::from(name);
        Box::pin(async move {
            let mut conn = self.connect().await?;
            let statement = format!("CREATE DATABASE \"{name_owned}\"");
            let result = conn.execute(statement.as_str()).await;
            drop(conn.close().await);
            result
                .map(|_| ())
                .map_err(|e| DatabaseError::ProvisioningFailed {
                    name: name_owned.clone(),
                    message: e.to_string(),
                })
        })
    }

    fn drop_database(&self, name: &str) -> AdminFuture<'_> {
        let name_owned = String::from(name);
        Box::pin(async move {
            let mut conn = self.connect().await?;
            let statement = format!("DROP DATABASE \"{name_owned}\"");
            let result = conn.execute(statement.as_str()).await;
            drop(conn.close().await);
            result
                .map(|_| ())
                .map_err(|e| DatabaseError::TeardownFailed {
                    name: name_owned.clone(),
                    message: e.to_string(),
                })
        })
    }
}

/// PostgreSQL-backed [`DatabaseProvisioner`].
pub struct PgProvisioner {
    admin: Arc<dyn AdminClient>,
    name: String,
}

impl PgProvisioner {
    /// Create a provisioner for the named test database.
    #[must_use]
    pub fn new(admin: Arc<dyn AdminClient>, name: impl Into<String>) -> Self {
        Self {
            admin,
            name: name.into(),
        }
    }
}

impl DatabaseProvisioner for PgProvisioner {
    fn setup(&self, keepdb: bool) -> SetupFuture<'_> {
        Box::pin(async move {
            validate_database_name(&self.name)?;

            let exists = self.admin.database_exists(&self.name).await?;
            if exists && !keepdb {
                // A stale database from a previous run: recreate from scratch.
                self.admin.drop_database(&self.name).await?;
            }
            if !exists || !keepdb {
                self.admin.create_database(&self.name).await?;
            }

            Ok(Box::new(TestDatabase {
                admin: Arc::clone(&self.admin),
                name: self.name.clone(),
            }) as Box<dyn DatabaseHandle>)
        })
    }
}

/// Handle to the provisioned test database.
struct TestDatabase {
    admin: Arc<dyn AdminClient>,
    name: String,
}

impl DatabaseHandle for TestDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn teardown(self: Box<Self>, keepdb: bool) -> TeardownFuture {
        Box::pin(async move {
            if keepdb {
                return Ok(());
            }
            self.admin.drop_database(&self.name).await?;
            Ok(())
        })
    }
}
