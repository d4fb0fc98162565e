pub mod artifacts;
pub mod cache;
pub mod database;
pub mod paths;
pub mod report;

#[derive(Clone, Debug, Default, PartialEq)]
pub enum ServerBackend {
    #[default]
    Unknown,
    Local,
    Postgres,
    Redis,
}

impl From<&str> for ServerBackend {
    fn from(value: &str) -> Self {
        match value {
            "local" => ServerBackend::Local,
            "postgres" => ServerBackend::Postgres,
            "redis" => ServerBackend::Redis,
            _ => ServerBackend::Unknown,
        }
    }
}
