pub mod bm25;
pub mod vector;

pub use bm25::Bm25Index;
pub use vector::VectorStore;
