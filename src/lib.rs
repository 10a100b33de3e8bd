//! Record iterators for Who's On First style data repositories.
//!
//! An iterator is configured from a URI and crawls a list of sources,
//! producing a lazy [`RecordStream`] of `(path, content)` records
//! interleaved with per-source errors:
//!
//! - `git://` clones repositories and walks their head tree.
//! - `githubapi://` walks one repository through the GitHub contents API.
//! - `githuborg://` crawls every matching repository of an organization,
//!   optionally deduplicating records across repositories.
//!
//! ```no_run
//! # async fn crawl() -> Result<(), wof_iterate::IterateError> {
//! let it = wof_iterate::new_iterator("git://?include=properties.wof:placetype=region")?;
//! let mut records = it.iterate(vec![
//!     "https://github.com/whosonfirst-data/whosonfirst-data-admin-ca.git".into(),
//! ]);
//! while let Some(item) = records.next().await {
//!     match item {
//!         Ok(rec) => println!("{}", rec.path),
//!         Err(e) => eprintln!("{e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod contract;
pub mod download;
pub mod error;
pub mod filters;
pub mod git;
pub mod github;
pub mod record;
pub mod registry;
pub mod stream;
pub mod wof_uri;

pub use contract::RecordIterator;
pub use error::{FilterError, IterateError, Result};
pub use filters::{Filters, QueryFilters};
pub use record::{Record, RecordContent};
pub use registry::{default_registry, new_iterator, Registry};
pub use stream::{Emitter, RecordStream};
