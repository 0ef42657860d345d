pub mod buffer;
pub mod disk;
pub mod page;
pub mod table;
