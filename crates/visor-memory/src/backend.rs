use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Csv,
}

/// Storage backend for a `MemoryStore`. `InMemory` lives for the process
/// lifetime only; `File` auto-loads on construction and auto-saves after
/// every mutating operation.
#[derive(Debug, Clone)]
pub enum Backend {
    InMemory,
    File { path: PathBuf, format: FileFormat },
}
