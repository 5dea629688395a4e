#![forbid(unsafe_code)]

//! Free-page management core of an embedded, single-file, copy-on-write
//! key-value engine.
//!
//! The [`freelist::Freelist`] tracks which pages of the database file
//! are reusable, which are pending behind open readers, and how the set
//! is persisted in the file's freelist page. [`store::PageStore`] and
//! [`tx::TxRegistry`] are the collaborators the enclosing engine wires
//! it to.

pub mod error;
pub mod freelist;
pub mod page;
pub mod store;
pub mod tx;
pub mod types;

pub use crate::error::{Result, TenebraError};
pub use crate::freelist::{Freelist, PendingEntry, Span, SpanAllocator, SpanIndex};
pub use crate::page::{Page, DEFAULT_PAGE_SIZE, FREELIST_PAGE_FLAG, PAGE_HDR_LEN};
pub use crate::store::PageStore;
pub use crate::tx::TxRegistry;
pub use crate::types::{Pgid, Txid};
