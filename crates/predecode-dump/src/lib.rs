pub mod model;
pub mod walk;

// Re-export commonly used types/functions for consumers
pub use model::{is_mapped, load_raw_bin, read_u8, Image, Segment};
pub use walk::{summarize, walk_range, InsnOut, Summary, WalkReport};
