pub mod archive;
pub mod config_loader;
pub mod constants;
pub mod roster;
pub mod token;

pub use archive::{ArchivedResponse, ArchivedScore, JsonlArchive, MemoryArchive, RoundArchive};
pub use config_loader::*;
pub use constants::*;
pub use roster::{MinerEntry, MinerRoster, RosterSection};
pub use token::Token;
