pub mod drawing;
pub mod loader;
pub mod postprocessing;
pub mod transforms;

pub use drawing::draw_detections;
pub use loader::ImageLoader;
pub use postprocessing::ResultFormatter;
pub use transforms::ImageTransforms;
