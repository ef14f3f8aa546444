pub mod interface_registry;
pub mod scanner;
