use std::ffi::OsStr;
use std::path::PathBuf;

/// Where intermediate representations are dumped, if anywhere.
#[derive(Clone, Debug)]
pub struct ArtifactDir {
    pub dir_path: PathBuf,
    pub filename_prefix: PathBuf,
}

impl ArtifactDir {
    pub fn artifact_path(&self, extension: &(impl AsRef<OsStr> + ?Sized)) -> PathBuf {
        self.dir_path
            .join(self.filename_prefix.with_extension(extension))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ExecutionMode {
    #[default]
    Interpret,
    // Hand the optimized typed IR to a backend
    Compile,
}

/// What the driver does when a function cannot be specialized for its argument types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum FallbackMode {
    #[default]
    Interpret,
    Fail,
}

#[derive(Clone, Debug)]
pub struct PassOptions {
    pub copy_elimination: bool,
    pub verify_types: bool,
    // Cross-check interpreted results against the symbolically inferred result shape
    pub check_shapes: bool,
    pub fallback: FallbackMode,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            copy_elimination: true,
            verify_types: true,
            check_shapes: false,
            fallback: FallbackMode::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_artifact_path() {
        let dir = ArtifactDir {
            dir_path: PathBuf::from("/tmp/out"),
            filename_prefix: PathBuf::from("norm"),
        };
        assert_eq!(dir.artifact_path("typed"), PathBuf::from("/tmp/out/norm.typed"));
    }
}
