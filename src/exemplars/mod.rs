//! Exemplar memory
//!
//! A bounded set of stored samples per class. With capacity `K` and `n` known
//! classes each class keeps at most `floor(K / n)` samples, so old lists are
//! cut back to a prefix every time new classes arrive.
//!
//! - `selection` - Quota, herding and random selection
//! - `set` - Per-class storage and nearest-mean-of-exemplars classification

mod selection;
mod set;

pub use selection::{exemplar_quota, herding_selection, random_selection};
pub use set::{nearest_mean, ExemplarSet};
