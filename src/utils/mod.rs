//! Utility modules

pub mod error;
pub mod packet;

pub use error::{AuthError, CacheError, ConnectionError, ProtocolError, Result};
pub use packet::{
    counter_extras, encode_request, set_extras, Opcode, PacketDecoder, PacketEncoder, Response,
    Status, JSON_FLAG,
};
