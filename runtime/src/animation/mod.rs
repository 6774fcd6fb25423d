pub mod driver;
pub mod renderer;

pub use driver::AnimationDriver;
pub use renderer::{AvatarModel, HeadlessSurface, RenderSurface, Transform};
