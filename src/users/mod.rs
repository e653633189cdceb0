//! Online users: per-hub directory and the process-wide registry

pub mod cid;
pub mod directory;
pub mod identity;
pub mod registry;

pub use cid::{Cid, CID_LEN};
pub use directory::{OnlineUser, OnlineUserPtr, UserDirectory};
pub use identity::{Identity, UserFlags};
pub use registry::{RegisteredUser, UserRegistry};
