pub mod pipeline;
pub mod types;

pub use pipeline::OcrPipeline;
pub use types::{OcrResult, OcrText};
