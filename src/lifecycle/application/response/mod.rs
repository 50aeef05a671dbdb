pub mod node_response;
