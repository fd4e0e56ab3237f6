pub mod compression;
pub mod hash;
pub mod kube;
pub mod labels;
pub mod resources;
pub mod store;
pub mod test_utils;
