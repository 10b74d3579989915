pub mod clusterlink;
