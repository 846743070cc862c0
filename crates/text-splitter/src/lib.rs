//! # text-splitter
//!
//! Registry of named text segmentation methods.
//!
//! Requests pick a method by name (`cut0` through `cut5`); the request
//! validator rejects names that are not registered here, and engines use
//! the selected method to cut text into synthesis fragments.
//!
//! # Example
//!
//! ```ignore
//! use text_splitter::SplitterRegistry;
//!
//! let splitter = SplitterRegistry::new();
//! let parts = splitter.split("cut5", "Hello, world!")?;
//! assert_eq!(parts, vec!["Hello,", "world!"]);
//! ```

mod methods;

use tracing::instrument;
use tts_core::{TtsError, TtsResult};

pub use methods::{
    AllPunctuation, ChinesePeriod, EnglishPeriod, FiftyChars, FourSentences, NoSplit, SplitMethod,
};

/// Text splitter with a configurable set of methods.
#[derive(Debug)]
pub struct SplitterRegistry {
    methods: Vec<Box<dyn SplitMethod>>,
}

impl Default for SplitterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SplitterRegistry {
    /// Create a registry with the built-in methods.
    pub fn new() -> Self {
        Self {
            methods: methods::default_methods(),
        }
    }

    /// Create a registry with custom methods.
    pub fn with_methods(methods: Vec<Box<dyn SplitMethod>>) -> Self {
        Self { methods }
    }

    /// Register another method. A method with the same name is replaced.
    pub fn register(&mut self, method: Box<dyn SplitMethod>) {
        self.methods.retain(|m| m.name() != method.name());
        self.methods.push(method);
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Look up a method by name.
    pub fn get(&self, name: &str) -> Option<&dyn SplitMethod> {
        self.methods
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.as_ref())
    }

    /// Registered method names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.methods.iter().map(|m| m.name()).collect()
    }

    /// Cut `text` with the named method.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub fn split(&self, name: &str, text: &str) -> TtsResult<Vec<String>> {
        let method = self
            .get(name)
            .ok_or_else(|| TtsError::invalid_input(format!("text_split_method:{name} is not supported")))?;
        Ok(method.split(text))
    }
}
