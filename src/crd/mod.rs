mod patroni_cluster;

pub use patroni_cluster::*;
