mod docker;

pub use docker::{DockerBackend, INSTANCE_LABEL};
