pub mod docker_host;
pub mod execution_host;
pub mod fabric;
pub mod host_mock;
