//! Protocol module containing the verb set, wire constants, and the text codec.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_command, decode_listing, decode_properties, decode_response, encode_command,
    encode_listing, encode_properties, encode_response, parse_size, split_marker, ProtocolError,
};
pub use messages::*;
