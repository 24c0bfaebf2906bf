mod store;

pub use store::{decay_factor, PreferenceStore, SignalApplication};
