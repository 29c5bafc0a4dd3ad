//! Reader variants

mod connection;
mod file;
mod tail;
mod tcp;
mod unix;

pub use file::FileReader;
pub use tail::TailReader;
pub use tcp::TcpSocketReader;
pub use unix::UnixSocketReader;
