//! boltr-driver: a pure-Rust Bolt client driver.
//!
//! Talks the Bolt binary protocol (versions 1 to 5.4) to Neo4j-compatible
//! graph databases: pipelined requests on pooled connections, auto-commit
//! statements and explicit transactions with bookmark chaining, and
//! cluster routing driven by the server's routing procedure.
//!
//! # Architecture
//!
//! - **`packstream`**: binary value encoding (PackStream)
//! - **`chunk`**: message framing (2-byte length-prefixed chunks)
//! - **`message`**: request/response messages and their serialization
//! - **`version`**: handshake proposals and negotiated versions
//! - **`protocol`**: per-version message sequences and response handlers
//! - **`connection`**: one socket, its reader task and response dispatcher
//! - **`pool`**: bounded per-address connection pools
//! - **`session`**: sessions, transactions, result cursors, bookmarks
//! - **`routing`**: routing table, discovery and the load balancer
//! - **`driver`**: URIs, auth, configuration and the [`Driver`] itself
//!
//! ```no_run
//! use boltr_driver::{AccessMode, AuthToken, Config, Driver};
//!
//! # async fn demo() -> Result<(), boltr_driver::BoltError> {
//! let driver = Driver::new("bolt://localhost:7687", AuthToken::basic("neo4j", "secret"), Config::default())?;
//! let session = driver.session(AccessMode::Write, None);
//! let tx = session.begin_transaction(None).await?;
//! tx.run("CREATE (:Person {name: 'Ada'})", None).await?.consume().await?;
//! tx.commit().await?;
//! session.close().await?;
//! driver.close().await;
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod connection;
pub mod driver;
pub mod error;
pub mod message;
pub mod packstream;
pub mod pool;
pub mod protocol;
pub mod provider;
pub mod routing;
pub mod session;
pub mod types;
pub mod version;

#[cfg(test)]
pub(crate) mod test_support;

pub use driver::{AuthToken, BoltAddress, Config, Driver};
pub use error::BoltError;
pub use session::{AccessMode, Bookmark, Record, ResultCursor, ResultSummary, Session, Transaction};
pub use types::{BoltDict, BoltValue};
