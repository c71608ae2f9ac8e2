extern crate byteorder;
extern crate flate2;
extern crate rondo_primitives as primitives;
extern crate rustc_hex as hex;

mod compressed;
mod impls;
mod reader;
mod stream;

pub use primitives::{bytes, hash};

pub use reader::{deserialize, Deserializable, Error, Reader};
pub use stream::{serialize, serialized_size, Serializable, Stream};

/// Maximum size of a single serialized object, compressed or not.
pub const MAX_DATA_SIZE: usize = 40 * 1024 * 1024;

/// zlib compression level used by the compressed-data primitive.
pub const COMPRESSION_LEVEL: u32 = 4;
