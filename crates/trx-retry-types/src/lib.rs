// === Chain-facing value types for transaction retry tracking ===
pub mod block;
pub mod trace;
pub mod transaction;

pub use block::{BlockNumber, HeadBlock, Timestamp};
pub use trace::{ActionTrace, TransactionTrace, ONBLOCK_ACTION, SYSTEM_ACCOUNT};
pub use transaction::{ReceiptStatus, TransactionId, TransactionIdError, TransactionReceipt};
