pub mod session_channel;
pub mod transport;

pub use session_channel::{ChannelHandle, ConnectionState, Inbound, Outbound, SessionChannel};
pub use transport::{Connector, Frame, WsConnector};
