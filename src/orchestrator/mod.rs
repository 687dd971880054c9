mod actor;
mod channel;
mod handle;
mod shutdown;
mod startup;
mod types;


pub(crate) use channel::Command;
pub use handle::{RecorderBuilder, RecorderHandle};
pub use types::RecorderState;
