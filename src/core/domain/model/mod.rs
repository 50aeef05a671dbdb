pub mod api_types;
pub mod audit;
pub mod cluster;
pub mod exec_environment;
pub mod instance_config;
pub mod listener;
pub mod node;
pub mod profile;
pub mod seal;
pub mod settings;
pub mod storage;
