//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use relgraph::{
    config::GraphConfig,
    identifier::{ResourceDescriptor, ResourceKey},
    schema::SchemaRegistry,
    session::Session,
};
use std::{path::PathBuf, sync::Arc};
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A blog-like schema: users with friends and posts, posts with comments, and tags without
/// inverses.
pub const BLOG_SCHEMA: &str = r#"
[user.attributes.name]
type = "string"

[user.relationships.best_friend]
kind = "one"
type = "user"
inverse = "best_friend"

[user.relationships.posts]
kind = "many"
type = "post"
inverse = "author"
async = true

[post.attributes.title]
type = "string"

[post.relationships.author]
kind = "one"
type = "user"
inverse = "posts"

[post.relationships.comments]
kind = "many"
type = "comment"
inverse = "post"

[post.relationships.tags]
kind = "many"
type = "tag"

[comment.relationships.post]
kind = "one"
type = "post"
inverse = "comments"

[tag.attributes.label]
type = "string"
"#;

#[allow(dead_code)]
pub fn blog_schema() -> SchemaRegistry {
    SchemaRegistry::from_toml_str(BLOG_SCHEMA).unwrap()
}

#[allow(dead_code)]
pub fn blog_session() -> Session {
    init_logging();
    Session::new(Arc::new(blog_schema()), GraphConfig::strict())
}

/// Write the blog schema to `<temp_dir>/schema.toml` and return its path.
#[allow(dead_code)]
pub fn write_blog_schema(temp_dir: &TempDir) -> PathBuf {
    let path = temp_dir.path().join("schema.toml");
    std::fs::write(&path, BLOG_SCHEMA).unwrap();
    path
}

#[allow(dead_code)]
pub fn lookup(session: &Session, resource_type: &str, id: &str) -> ResourceKey {
    session
        .registry()
        .peek(&ResourceDescriptor::new(resource_type, id))
        .unwrap()
}
