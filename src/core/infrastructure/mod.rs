pub mod api_client;
pub mod poll;
pub mod process;
pub mod workspace;
