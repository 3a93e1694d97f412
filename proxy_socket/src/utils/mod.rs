mod addr;
mod uri_parse;

pub use addr::{HostName, SocketAddr};
pub use uri_parse::ParsedUri;
