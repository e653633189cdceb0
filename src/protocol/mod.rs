//! NMDC wire protocol: handshake cipher, line codec, command shapes

pub mod cipher;
pub mod codec;
pub mod command;
pub mod myinfo;
pub mod search;

pub use cipher::make_key;
pub use codec::{escape, parse_line, unescape, CodecError, NmdcCodec, ParsedLine};
pub use command::{ConnectRequest, NatFlag, OutCommand};
pub use myinfo::{ClientTag, MyInfo, NmdcStatus, OwnInfo};
pub use search::{SearchKind, SearchMode, SearchQuery, SearchRequest, Seeker, SizeMode};
