mod base;

pub use base::EntryStore;
