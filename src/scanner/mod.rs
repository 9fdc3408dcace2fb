//! Hidden-file scanner: walker, classifier, executor, and the pipeline that
//! ties them together.

pub mod cancel;
pub mod classifier;
pub mod executor;
pub mod pipeline;
pub mod protection;
pub mod report;
pub mod walker;
