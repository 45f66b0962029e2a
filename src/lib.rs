#![warn(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub use checksum::compute_internet_checksum;
pub use ping_error::{PingError, PingResult};
pub use response::Response;
pub use response_stat::ResponseStat;
pub use session::{PingSession, ResponseStream};
pub use transport::{RawSocket, Transport};

mod checksum;
mod icmpv4;
mod ping_error;
mod response;
mod response_stat;
mod session;
mod transport;
