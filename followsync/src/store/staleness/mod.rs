mod base;

pub use base::StalenessStore;
