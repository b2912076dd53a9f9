pub mod errors;
pub mod mempool_types;
