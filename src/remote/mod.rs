mod drive;
mod memory;
mod store;

pub use drive::DriveClient;
pub use memory::MemoryRemote;
pub use store::{read_json, RemoteError, RemoteFile, RemoteStore};
