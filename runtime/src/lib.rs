pub mod animation;
pub mod app;
pub mod audio;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod error;
pub mod server;
pub mod session;

pub use animation::{AnimationDriver, HeadlessSurface};
pub use app::{App, Backends};
pub use audio::capture::AudioCapture;
pub use channel::{SessionChannel, WsConnector};
pub use error::{RuntimeError, RuntimeResult};
pub use server::ControlServer;
pub use session::{LogChatView, Session};
