// Timestamp core: normalization for the load path, comparison for the validation path

pub mod compare;
pub mod normalize;

pub use compare::{compare_rendered, Mismatch, Pairing, RenderedRow, ValidationOutcome};
pub use normalize::{NormalizedDataset, TimestampNormalizer};
