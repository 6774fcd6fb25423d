pub mod ipc;
pub mod protocol;

pub use ipc::{Command, DragPhase, IpcError, Response, StatusInfo};
pub use protocol::{ClientMessage, ControlMessage, ServerMessage};
