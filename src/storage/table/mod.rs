pub mod error;
pub mod heap;
pub mod iterator;

pub use error::TableError;
pub use heap::{format_table_page, TableHeap, TupleChange};
pub use iterator::TableIterator;
