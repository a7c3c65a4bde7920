pub mod codec;
pub mod compositor;

pub use codec::{encode, rotate, Rotation, UploadedImage, ACCEPTED_EXTENSIONS};
pub use compositor::{compose, CompositeImage};
