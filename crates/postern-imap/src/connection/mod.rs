//! Socket-facing side of the server.
//!
//! [`Server`] accepts TCP connections and spawns one [`Connection`] task
//! per client. The connection moves bytes between the socket and the
//! transport pipeline and drives the decoder, dispatcher and result
//! producers.

mod driver;
mod server;

pub use driver::Connection;
pub use server::Server;
