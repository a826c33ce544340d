pub mod code_entry;
pub mod code_map;
pub mod source_position;
pub mod tree;
pub mod types;
