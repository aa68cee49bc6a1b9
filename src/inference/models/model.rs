use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ModelBase {
    /// The name of the model
    pub name: String,

    /// The license of the model
    pub license: String,

    /// Where the model snapshot is loaded from
    pub source: ModelSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A directory containing the snapshot files
    Local(PathBuf),

    /// A Hugging Face model repository at a given revision
    Hub { repo_id: String, revision: String },
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSource::Local(path) => write!(f, "{}", path.display()),
            ModelSource::Hub { repo_id, revision } => write!(f, "{repo_id}@{revision}"),
        }
    }
}
