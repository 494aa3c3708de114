//! Configuration types

use serde::{Deserialize, Serialize};

/// Methodology for header dependency and magic flag extraction.
///
/// `Direct` uses HeaderHound's own lightweight preprocessor simulation.
/// `Cpp` shells out to the real C preprocessor and is used as the
/// correctness oracle the direct strategy must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Direct,
    Cpp,
}

impl std::str::FromStr for StrategyKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(StrategyKind::Direct),
            "cpp" => Ok(StrategyKind::Cpp),
            _ => Err(crate::Error::Config(format!("unknown strategy: {}", s))),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Direct => write!(f, "direct"),
            StrategyKind::Cpp => write!(f, "cpp"),
        }
    }
}

/// HeaderHound configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// C++ compiler, also queried for its built-in macros
    pub compiler: String,

    /// C preprocessor; when unset the compiler doubles as the preprocessor
    pub preprocessor: Option<String>,

    /// C preprocessor flags (`-I path`, `-D NAME[=VALUE]`, `-isystem path`)
    pub cppflags: String,

    /// C compiler flags
    pub cflags: String,

    /// C++ compiler flags
    pub cxxflags: String,

    /// Maximum bytes to read from each file (0 = entire file)
    pub max_read_size: usize,

    /// Methodology for determining header dependencies
    pub header_deps: StrategyKind,

    /// Methodology for reading files when extracting magic flags
    pub magic: StrategyKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compiler: "g++".to_string(),
            preprocessor: None,
            cppflags: String::new(),
            cflags: String::new(),
            cxxflags: String::new(),
            max_read_size: 0,
            header_deps: StrategyKind::Direct,
            magic: StrategyKind::Direct,
        }
    }
}

impl Config {
    /// The preprocessor command, falling back to the compiler.
    pub fn preprocessor(&self) -> &str {
        self.preprocessor.as_deref().unwrap_or(&self.compiler)
    }
}
