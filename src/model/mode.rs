/// Application interaction modes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Mode {
    /// Browse mode: move through the catalog and toggle plugins.
    #[default]
    Browse,
    /// Project prompt: typing the path of a `.flaxproj` manifest.
    OpenProject,
    /// An install run is in progress; the apply trigger is disabled.
    Installing,
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Browse => "BROWSE",
            Mode::OpenProject => "OPEN",
            Mode::Installing => "INSTALL",
        }
    }
}
