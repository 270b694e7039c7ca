//! Everything between a byte stream and a typed value: line framing,
//! per-variable codecs, target URIs and SSDP discovery messages.

pub mod codec;
pub mod framing;
pub mod ssdp;
pub mod uri;

pub use codec::{DecodeError, EncodeError, FallbackCodec, LineFormat, PrefixCodec, VariableCodec};
pub use framing::LineCodec;
pub use uri::{TargetUri, UriError};
