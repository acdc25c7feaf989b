use thiserror::Error;

#[derive(Error, Debug)]
pub enum Cmd2MqttError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("MQTT connection error: {0}")]
    MqttConnection(String),
}

pub type Error = Cmd2MqttError;
pub type Result<T> = std::result::Result<T, Error>;
