mod bind_address;
mod entity_name;
mod product_type;

pub use bind_address::BindAddress;
pub use product_type::ProductType;

// Re-export validation functions for internal use
pub(crate) use entity_name::validate_entity_name;
pub(crate) use product_type::is_server_binary;
