/// Overrides supplied by the embedding process, applied after files and environment.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Extra configuration file, loaded last among the files
    pub cfg_name: Option<String>,
    pub agent_id: Option<String>,
    pub app_name: Option<String>,
    pub request_timeout: Option<std::time::Duration>,
}
