mod core;
mod record;
mod store;

pub use self::core::{FinalizeOutcome, SessionFinalizer, NO_DATA_REASON};
pub use record::{PersistedSessionRecord, RecordSummary};
pub use store::{FileSessionStore, SessionStore};
