use std::path::PathBuf;

/// Where evaluated commands end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Run commands directly, checking timestamps as we go.
    #[default]
    Exec,
    /// Write a static, timestamp independent build.ninja.
    Ninja,
}

#[derive(Debug, Clone, Default)]
pub struct Flags {
    pub backend: Backend,
    /// `-s`: commands are not echoed unless a recipe says otherwise.
    pub silent_mode: bool,
    pub fatal_errors: bool,
    pub makefile: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub ninja_file: PathBuf,
    pub targets: Vec<String>,
    /// `NAME=value` assignments given on the command line.
    pub cl_vars: Vec<String>,
}

impl Flags {
    pub fn generate_ninja(&self) -> bool {
        self.backend == Backend::Ninja
    }
}
