pub mod cluster_start_request;
