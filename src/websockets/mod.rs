// Public API
pub use handler::{authenticate, websocket_handler, AuthQuery};
pub use socket::{Connection, SocketError, SocketWrapper};

// Internal modules
mod handler;
mod socket;
