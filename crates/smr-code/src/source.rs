use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Resolves a locator to descriptor record text.
pub trait DescriptorSource {
    fn fetch(&self, locator: &str) -> io::Result<String>;
}

/// Reads descriptor files, relative to `root` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    root: Option<PathBuf>,
}

impl FileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, locator: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(locator),
            None => Path::new(locator).to_path_buf(),
        }
    }
}

impl DescriptorSource for FileSource {
    fn fetch(&self, locator: &str) -> io::Result<String> {
        std::fs::read_to_string(self.resolve(locator))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: HashMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, locator: impl Into<String>, text: impl Into<String>) {
        self.entries.insert(locator.into(), text.into());
    }
}

impl DescriptorSource for MemorySource {
    fn fetch(&self, locator: &str) -> io::Result<String> {
        self.entries.get(locator).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no descriptor at {}", locator))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CodeDescriptor;
    use crate::error::CodeError;
    use std::io::Write;
    use tempfile::tempdir;

    const HELLO: &str = r#"{"argcount":0,"nlocals":0,"stacksize":1,"flags":67,
        "code":"ZAFTAA==","consts":[null,"Hello World!"],"names":[],"varnames":[],
        "freevars":[],"cellvars":[],"firstlineno":1,"lnotab":"AAE="}"#;

    #[test]
    fn file_source_reads_relative_to_root() {
        let dir = tempdir().expect("tempdir");
        let mut file = std::fs::File::create(dir.path().join("hello.json")).expect("create");
        file.write_all(HELLO.as_bytes()).expect("write");

        let source = FileSource::rooted(dir.path());
        let descriptor =
            CodeDescriptor::from_external_source(&source, "hello.json").expect("descriptor");
        assert_eq!(descriptor.qualified_name, "<string>");
    }

    #[test]
    fn missing_locator_is_not_found() {
        let source = FileSource::rooted(tempdir().expect("tempdir").path());
        let err = CodeDescriptor::from_external_source(&source, "nope.json").expect_err("missing");
        assert!(matches!(err, CodeError::NotFound { locator } if locator == "nope.json"));
    }

    #[test]
    fn memory_source_hands_text_to_the_parser() {
        let mut source = MemorySource::new();
        source.insert("broken", "{");
        let err = CodeDescriptor::from_external_source(&source, "broken").expect_err("format");
        assert!(matches!(err, CodeError::Format { .. }));
    }
}
