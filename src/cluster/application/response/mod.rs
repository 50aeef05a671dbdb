pub mod cluster_response;
