mod error;
mod index;
mod node;
mod serialization;

pub use error::BTreeError;
pub use index::{BTreeIndex, BTreeIterator, BTreeStats};
pub use node::{BTreeNode, IndexKey};
pub use serialization::{calculate_btree_order, deserialize_node, serialize_node};
