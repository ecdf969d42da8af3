//! Open Cluster Management resources consumed by the operator. These CRDs are owned and
//! installed by the hub; only the fields the operator reads are modelled here.

pub mod managedclusteraddons;
pub mod managedclusters;
