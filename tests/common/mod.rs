//! Shared helpers for integration tests
//!
//! Builds throwaway on-disk knowledge bases and wires the API facade to a
//! mock backend launcher so execution tests never depend on installed
//! interpreters.

#![allow(dead_code)]

use rhizome::exec::mock::{MockBehavior, MockLauncher};
use rhizome::{FsStore, GraphEngine, RhizomeApi, SessionManager};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A temporary knowledge base directory seeded with documents.
pub struct TestBase {
    dir: TempDir,
    docs: Vec<String>,
}

impl TestBase {
    /// Write `(relative path, content)` pairs into a fresh tempdir.
    pub fn new(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("failed to create tempdir for test base");
        let mut docs = Vec::new();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("failed to create parent dirs");
            }
            std::fs::write(&path, content).expect("failed to seed test document");
            docs.push(rel.to_string());
        }
        Self { dir, docs }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Relative paths of the seeded documents.
    pub fn docs(&self) -> Vec<String> {
        self.docs.clone()
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(rel)).expect("failed to read test document")
    }

    pub fn write(&self, rel: &str, content: &str) {
        std::fs::write(self.dir.path().join(rel), content).expect("failed to write test document")
    }
}

/// API facade over the filesystem store and a mock backend launcher.
pub fn api_with_mock(behavior: MockBehavior) -> (Arc<MockLauncher>, RhizomeApi) {
    let launcher = Arc::new(MockLauncher::new(behavior));
    let api = RhizomeApi::new(
        Arc::new(GraphEngine::new()),
        Arc::new(SessionManager::new(launcher.clone())),
        Arc::new(FsStore::new()),
    );
    (launcher, api)
}

/// Index every seeded document of a base into the engine.
pub async fn index(api: &RhizomeApi, base: &TestBase, name: &str) {
    api.base_create(name).expect("base already exists");
    api.index_documents(name, base.root(), base.docs())
        .await
        .expect("indexing test base failed");
}
