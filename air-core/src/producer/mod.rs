mod decode;
pub mod resample;

pub use decode::{OutputFormat, TickProducer};
pub use resample::{select_resample_mode, CadenceAccumulator, ResampleMode};
