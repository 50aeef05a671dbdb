use crate::core::domain::{model::seal::Seal, value_object::ProductType};

/// Port distance between consecutive nodes of a started cluster.
pub const PORT_STRIDE: u16 = 100;

/// Parameters for building and starting a whole HA cluster.
#[derive(Debug, Clone)]
pub struct ClusterStartRequest {
    pub name: String,
    pub count: usize,
    /// Host, without port, every node listens on.
    pub listen: String,
    /// Port of the first node; node `i` listens on `base_port + 100 * i`.
    pub base_port: u16,
    pub product: ProductType,
    pub seals: Vec<Seal>,
}

impl ClusterStartRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: 3,
            listen: "0.0.0.0".into(),
            base_port: 8200,
            product: ProductType::Auto,
            seals: Vec::new(),
        }
    }

    pub fn node_name(&self, index: usize) -> String {
        format!("{}-node-{index}", self.name)
    }
}
