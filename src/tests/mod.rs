pub(crate) mod support;

mod resources {
    mod cluster_tests;
    mod node_tests;
    mod profile_tests;
}
