//! # Transaction Module
//!
//! The canonical transaction record and the envelope codec that produces it.
//!
//! ```text
//! types.rs: TransactionId, TransactionStatus lifecycle, TransactionRecord
//! codec.rs: decode(raw) -> TransactionRecord | ValidationError
//! ```

pub mod codec;
pub mod types;

pub use codec::{decode, ValidationError, ValidationReason};
pub use types::{LifecycleError, TransactionId, TransactionRecord, TransactionStatus};
