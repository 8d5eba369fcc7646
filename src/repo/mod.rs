pub mod lifecycle;
pub mod sync;
pub mod url;
