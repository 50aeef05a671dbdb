pub mod cluster_service;
