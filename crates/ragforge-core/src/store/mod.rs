mod adapter;

pub use adapter::StoreAdapter;
