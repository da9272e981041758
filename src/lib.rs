pub mod error;
pub mod protocol;
pub mod server;
mod utils;

pub use error::{Error, Result};
pub use server::{Config, ConnState, Connection, ConnectionHandler};
pub use utils::get_time;
