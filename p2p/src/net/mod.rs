mod accept_connection;
mod channel;
mod connect;
mod connection;

pub use self::accept_connection::accept_connection;
pub use self::channel::{Channel, ConnectionSender, MAX_WAITING_PACKETS};
pub use self::connect::connect;
pub use self::connection::Connection;
