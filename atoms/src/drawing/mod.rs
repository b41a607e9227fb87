pub mod model;
pub mod service;

pub use model::{BoundingBox, PixelRect};
pub use service::{wrap_caption, Annotator, DrawingError};
