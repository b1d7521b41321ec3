pub mod command;
pub mod supervisor;

pub use command::{DecoderCommand, DEFAULT_DECODER};
pub use supervisor::{Shutdown, Supervisor};
